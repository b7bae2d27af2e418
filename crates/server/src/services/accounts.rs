//! Account management: registration, login, and the role-hierarchy rules.
//!
//! Role changes and deletions are super-admin-only operations, and even a
//! super-admin is bounded: no actor may strip its own privileged flags, the
//! last active super-admin can neither be demoted nor deleted, and a user
//! holding a paid-but-undelivered order cannot be deleted. Deletion never
//! removes the record; the email is anonymized and the soft-delete marker
//! set, keeping historical orders resolvable.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use serde_json::{Value, json};

use copperleaf_core::{Email, Role, UserId};

use crate::audit::{AuditCategory, AuditEvent, AuditLevel, AuditSink};
use crate::error::AppError;
use crate::models::Identity;
use crate::services::validate::{Expected, Rule, validate};
use crate::store::{Store, StoreError};

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;
const MAX_NAME_LENGTH: usize = 100;

/// Hash a password with argon2id and a fresh salt.
///
/// # Errors
///
/// Returns [`AppError::Internal`] if hashing fails.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

/// Verify a password against a stored argon2 hash.
#[must_use]
pub fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn registration_rules() -> Vec<Rule> {
    vec![
        Rule::new("name")
            .required()
            .expect(Expected::String)
            .min_length(1)
            .max_length(MAX_NAME_LENGTH),
        Rule::new("email").required().expect(Expected::String),
        Rule::new("password")
            .required()
            .expect(Expected::String)
            .min_length(MIN_PASSWORD_LENGTH)
            .max_length(MAX_PASSWORD_LENGTH),
    ]
}

fn required_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, AppError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::validation(format!("{field} is required")))
}

/// Register a new identity with the `User` role.
///
/// # Errors
///
/// `Validation` for a malformed payload or email, `Conflict` when the email
/// is already registered to a live identity.
pub async fn register(
    store: &dyn Store,
    audit: &AuditSink,
    payload: &Value,
) -> Result<Identity, AppError> {
    validate(payload, &registration_rules()).into_result()?;
    let email = Email::parse(required_str(payload, "email")?)
        .map_err(|e| AppError::validation(format!("email: {e}")))?;
    let password_hash = hash_password(required_str(payload, "password")?)?;

    let now = Utc::now();
    let identity = Identity {
        id: UserId::generate(),
        name: required_str(payload, "name")?.trim().to_owned(),
        email,
        password_hash: Some(password_hash),
        role: Role::User,
        deleted_at: None,
        deleted_by: None,
        created_at: now,
        updated_at: now,
    };

    match store.insert_identity(identity.clone()).await {
        Ok(()) => {}
        Err(StoreError::Conflict(_)) => {
            return Err(AppError::Conflict("email is already registered".to_owned()));
        }
        Err(e) => return Err(e.into()),
    }

    audit.record(
        AuditEvent::new(AuditLevel::Info, AuditCategory::Auth, "identity_registered")
            .actor(&identity.id),
    );
    Ok(identity)
}

/// Authenticate an email/password pair.
///
/// # Errors
///
/// `Unauthenticated` with one uniform message for every failure mode, so a
/// caller cannot probe which emails are registered.
pub async fn login(
    store: &dyn Store,
    audit: &AuditSink,
    raw_email: &str,
    password: &str,
) -> Result<Identity, AppError> {
    let denied = || AppError::Unauthenticated("invalid email or password".to_owned());
    let email = Email::parse(raw_email).map_err(|_| denied())?;

    let identity = store.identity_by_email(&email).await?;
    let verified = identity.as_ref().is_some_and(|identity| {
        identity
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(hash, password))
    });

    if let Some(identity) = identity.filter(|_| verified) {
        audit.record(
            AuditEvent::new(AuditLevel::Info, AuditCategory::Auth, "login_succeeded")
                .actor(&identity.id),
        );
        Ok(identity)
    } else {
        audit.record(
            AuditEvent::new(AuditLevel::Warn, AuditCategory::Auth, "login_failed")
                .context(json!({ "email": email.as_str() })),
        );
        Err(denied())
    }
}

/// Change an identity's role. The caller must already have passed the
/// super-admin gate.
///
/// # Errors
///
/// `Validation` for a malformed id or role, `NotFound` for a missing or
/// deleted target, `Forbidden` when the actor tries to strip its own
/// privileged flags, `Conflict` when the change would demote the last
/// active super-admin.
pub async fn update_role(
    store: &dyn Store,
    audit: &AuditSink,
    actor: &Identity,
    raw_target_id: &str,
    new_role: Role,
) -> Result<Identity, AppError> {
    let target_id: UserId = raw_target_id
        .parse()
        .map_err(|_| AppError::validation("malformed user id"))?;

    let target = store
        .identity_by_id(&target_id)
        .await?
        .filter(|t| !t.is_deleted())
        .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

    if target.id == actor.id && new_role < actor.role {
        audit.record(
            AuditEvent::new(AuditLevel::Warn, AuditCategory::Account, "self_demotion_denied")
                .actor(&actor.id),
        );
        return Err(AppError::Forbidden(
            "cannot strip your own privileges".to_owned(),
        ));
    }

    if target.role == Role::SuperAdmin
        && new_role < Role::SuperAdmin
        && store.count_active_super_admins().await? <= 1
    {
        return Err(AppError::Conflict(
            "cannot demote the last super-admin".to_owned(),
        ));
    }

    let updated = store.update_identity_role(&target_id, new_role).await?;
    audit.record(
        AuditEvent::new(AuditLevel::Info, AuditCategory::Account, "role_changed")
            .actor(&actor.id)
            .subject(&target_id)
            .context(json!({
                "from": target.role.to_string(),
                "to": new_role.to_string(),
            })),
    );
    Ok(updated)
}

/// Soft-delete an identity. The caller must already have passed the
/// super-admin gate.
///
/// The record survives with an anonymized email so historical orders keep a
/// resolvable owner.
///
/// # Errors
///
/// `Validation`, `NotFound`, `Forbidden` (self-deletion), or `Conflict`
/// (last super-admin, or the target holds a paid-undelivered order).
pub async fn delete_identity(
    store: &dyn Store,
    audit: &AuditSink,
    actor: &Identity,
    raw_target_id: &str,
) -> Result<(), AppError> {
    let target_id: UserId = raw_target_id
        .parse()
        .map_err(|_| AppError::validation("malformed user id"))?;

    let target = store
        .identity_by_id(&target_id)
        .await?
        .filter(|t| !t.is_deleted())
        .ok_or_else(|| AppError::NotFound("user not found".to_owned()))?;

    if target.id == actor.id {
        return Err(AppError::Forbidden(
            "cannot delete your own account from the back office".to_owned(),
        ));
    }
    if target.role == Role::SuperAdmin && store.count_active_super_admins().await? <= 1 {
        return Err(AppError::Conflict(
            "cannot delete the last super-admin".to_owned(),
        ));
    }
    if store.count_active_orders_for(&target_id).await? > 0 {
        return Err(AppError::Conflict(
            "user has undelivered paid orders".to_owned(),
        ));
    }

    let anonymized = Email::parse(&format!("deleted-{target_id}@anonymized.invalid"))
        .map_err(|e| AppError::Internal(format!("anonymized email rejected: {e}")))?;
    store
        .anonymize_identity(&target_id, &actor.id, anonymized, Utc::now())
        .await?;

    audit.record(
        AuditEvent::new(AuditLevel::Info, AuditCategory::Account, "identity_deleted")
            .actor(&actor.id)
            .subject(&target_id),
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{identity_with_role, pending_order};

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_password(&hash, "correct horse battery"));
        assert!(!verify_password(&hash, "wrong password"));
        assert!(!verify_password("not-a-hash", "anything"));
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let store = MemoryStore::new();
        let audit = AuditSink::disabled();
        let payload = json!({
            "name": "Ada",
            "email": "Ada@Example.com",
            "password": "a long password",
        });
        let identity = register(&store, &audit, &payload).await.unwrap();
        assert_eq!(identity.role, Role::User);
        // Email is case-normalized at registration and lookup.
        assert_eq!(identity.email.as_str(), "ada@example.com");

        let logged_in = login(&store, &audit, "ADA@example.COM", "a long password")
            .await
            .unwrap();
        assert_eq!(logged_in.id, identity.id);

        let err = login(&store, &audit, "ada@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_conflict() {
        let store = MemoryStore::new();
        let audit = AuditSink::disabled();
        let payload = json!({
            "name": "Ada",
            "email": "ada@example.com",
            "password": "a long password",
        });
        register(&store, &audit, &payload).await.unwrap();
        let err = register(&store, &audit, &payload).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_login_failure_message_is_uniform() {
        let store = MemoryStore::new();
        let audit = AuditSink::disabled();
        let unknown = login(&store, &audit, "ghost@example.com", "anything")
            .await
            .unwrap_err();

        register(
            &store,
            &audit,
            &json!({ "name": "Ada", "email": "ada@example.com", "password": "a long password" }),
        )
        .await
        .unwrap();
        let wrong_pw = login(&store, &audit, "ada@example.com", "wrong")
            .await
            .unwrap_err();

        assert_eq!(unknown.to_string(), wrong_pw.to_string());
    }

    #[tokio::test]
    async fn test_self_demotion_denied() {
        let store = MemoryStore::new();
        let audit = AuditSink::disabled();
        let actor = identity_with_role(Role::SuperAdmin);
        store.insert_identity(actor.clone()).await.unwrap();

        let err = update_role(&store, &audit, &actor, actor.id.as_str(), Role::User)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_last_super_admin_cannot_be_demoted_even_by_another() {
        let store = MemoryStore::new();
        let audit = AuditSink::disabled();
        let last = identity_with_role(Role::SuperAdmin);
        let admin = identity_with_role(Role::Admin);
        store.insert_identity(last.clone()).await.unwrap();
        store.insert_identity(admin.clone()).await.unwrap();

        // Even a (hypothetical second) super-admin actor cannot demote the
        // sole remaining one; here the actor is the admin being escalated
        // through the gate in routes, the rule itself is actor-independent.
        let err = update_role(&store, &audit, &admin, last.id.as_str(), Role::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_crossed_demotions_leave_one_super_admin() {
        let store = MemoryStore::new();
        let audit = AuditSink::disabled();
        let first = identity_with_role(Role::SuperAdmin);
        let second = identity_with_role(Role::SuperAdmin);
        store.insert_identity(first.clone()).await.unwrap();
        store.insert_identity(second.clone()).await.unwrap();

        // Each demotes the other. Whatever the interleaving, the store-level
        // quorum guard admits at most one of them.
        let (a, b) = tokio::join!(
            update_role(&store, &audit, &first, second.id.as_str(), Role::Admin),
            update_role(&store, &audit, &second, first.id.as_str(), Role::Admin),
        );

        let succeeded = usize::from(a.is_ok()) + usize::from(b.is_ok());
        assert_eq!(succeeded, 1);
        assert_eq!(store.count_active_super_admins().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_demotion_allowed_with_quorum() {
        let store = MemoryStore::new();
        let audit = AuditSink::disabled();
        let first = identity_with_role(Role::SuperAdmin);
        let second = identity_with_role(Role::SuperAdmin);
        store.insert_identity(first.clone()).await.unwrap();
        store.insert_identity(second.clone()).await.unwrap();

        let updated = update_role(&store, &audit, &first, second.id.as_str(), Role::User)
            .await
            .unwrap();
        assert_eq!(updated.role, Role::User);
    }

    #[tokio::test]
    async fn test_delete_blocked_by_active_order() {
        let store = MemoryStore::new();
        let audit = AuditSink::disabled();
        let actor = identity_with_role(Role::SuperAdmin);
        let target = identity_with_role(Role::User);
        store.insert_identity(actor.clone()).await.unwrap();
        store.insert_identity(target.clone()).await.unwrap();

        let mut order = pending_order(&target.id);
        order.is_paid = true;
        order.status = copperleaf_core::OrderStatus::Paid;
        store.commit_checkout(order).await.unwrap();

        let err = delete_identity(&store, &audit, &actor, target.id.as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_anonymizes_and_keeps_record() {
        let store = MemoryStore::new();
        let audit = AuditSink::disabled();
        let actor = identity_with_role(Role::SuperAdmin);
        let target = identity_with_role(Role::User);
        let original_email = target.email.clone();
        store.insert_identity(actor.clone()).await.unwrap();
        store.insert_identity(target.clone()).await.unwrap();

        delete_identity(&store, &audit, &actor, target.id.as_str())
            .await
            .unwrap();

        let record = store.identity_by_id(&target.id).await.unwrap().unwrap();
        assert!(record.is_deleted());
        assert_ne!(record.email, original_email);
        assert_eq!(record.deleted_by, Some(actor.id.clone()));
        // The freed email can be registered again.
        assert!(
            store
                .identity_by_email(&original_email)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_delete_self_denied() {
        let store = MemoryStore::new();
        let audit = AuditSink::disabled();
        let actor = identity_with_role(Role::SuperAdmin);
        store.insert_identity(actor.clone()).await.unwrap();

        let err = delete_identity(&store, &audit, &actor, actor.id.as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
