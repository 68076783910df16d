//! Telescope permission checks for ASCOM requests
//!
//! Runs after authentication. The device address resolves to a telescope
//! configuration through the device registry; an unbound device is unowned
//! and allowed. Grants are per-user first, then the strongest group grant.
//! Denials are 403; infrastructure failures are 500 and never silently allow.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use http::Method;
use sqlx::PgPool;
use uuid::Uuid;

use crate::ascom::auth::AuthenticatedUser;
use crate::ascom::devices::DeviceRegistry;
use crate::audit::{AuditLog, AuditOutcome, AuditRecord};
use crate::error::{Error, Result};

/// Permission levels, strongest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PermissionLevel {
    Admin,
    Control,
    Write,
    Read,
}

impl FromStr for PermissionLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Self::Admin),
            "control" => Ok(Self::Control),
            "write" => Ok(Self::Write),
            "read" => Ok(Self::Read),
            other => Err(Error::Validation(format!(
                "unknown permission level '{}'",
                other
            ))),
        }
    }
}

impl PermissionLevel {
    /// The level-vs-action matrix
    pub fn allows(&self, action: DeviceAction) -> bool {
        match self {
            Self::Admin => true,
            Self::Control | Self::Write => {
                matches!(action, DeviceAction::Read | DeviceAction::Write)
            }
            Self::Read => matches!(action, DeviceAction::Read),
        }
    }
}

/// What an HTTP request is trying to do to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Read,
    Write,
    Delete,
}

impl DeviceAction {
    pub fn from_method(method: &Method) -> Self {
        match *method {
            Method::PUT | Method::POST => Self::Write,
            Method::DELETE => Self::Delete,
            _ => Self::Read,
        }
    }
}

/// Parse `/api/v1/{device_type}/{device_number}/{method}` out of a path
pub fn parse_device_path(path: &str) -> Option<(String, u32, String)> {
    let mut segments = path.strip_prefix("/api/v1/")?.split('/');
    let device_type = segments.next().filter(|s| !s.is_empty())?;
    let device_number: u32 = segments.next()?.parse().ok()?;
    let method = segments.next().filter(|s| !s.is_empty())?;
    if segments.next().is_some() {
        return None;
    }
    Some((device_type.to_string(), device_number, method.to_string()))
}

/// Permission resolver backed by the datastore
pub struct TelescopeAuthorizer {
    pool: PgPool,
    registry: Arc<DeviceRegistry>,
    audit: AuditLog,
}

impl TelescopeAuthorizer {
    pub fn new(pool: PgPool, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            pool,
            registry,
            audit: AuditLog::new("ascom"),
        }
    }

    /// Effective permission for a user on a telescope
    ///
    /// A direct per-user grant wins; otherwise the strongest grant among the
    /// user's groups applies.
    pub async fn permission_for(
        &self,
        user_id: &str,
        telescope_id: Uuid,
    ) -> Result<Option<PermissionLevel>> {
        let direct: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT permission_level
            FROM telescope_permissions
            WHERE telescope_id = $1
              AND principal_type = 'user'
              AND principal_id = $2
            ORDER BY CASE permission_level
                WHEN 'admin' THEN 0
                WHEN 'control' THEN 1
                WHEN 'write' THEN 2
                WHEN 'read' THEN 3
                ELSE 4
            END
            LIMIT 1
            "#,
        )
        .bind(telescope_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((level,)) = direct {
            return Ok(Some(level.parse()?));
        }

        let via_group: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT tp.permission_level
            FROM telescope_permissions tp
            JOIN user_groups ug ON ug.group_id = tp.principal_id
            WHERE tp.telescope_id = $1
              AND tp.principal_type = 'group'
              AND ug.user_id = $2
            ORDER BY CASE tp.permission_level
                WHEN 'admin' THEN 0
                WHEN 'control' THEN 1
                WHEN 'write' THEN 2
                WHEN 'read' THEN 3
                ELSE 4
            END
            LIMIT 1
            "#,
        )
        .bind(telescope_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        via_group.map(|(level,)| level.parse()).transpose()
    }

    /// Authorize one request against the device it addresses
    pub async fn authorize(
        &self,
        user: Option<&AuthenticatedUser>,
        device_type: &str,
        device_number: u32,
        method: &Method,
    ) -> Result<()> {
        let device = match self.registry.lookup(device_type, device_number).await {
            Some(device) => device,
            None => {
                return Err(Error::NotFound(format!(
                    "no device {}/{}",
                    device_type, device_number
                )))
            }
        };

        let telescope_id = match device.telescope_config_id {
            Some(id) => id,
            // Unowned device: nothing to authorize against
            None => return Ok(()),
        };

        let device_path = format!("{}/{}", device_type, device_number);
        let user_id = match user {
            Some(user) => user.user_id.as_str(),
            None => {
                self.audit_denial("anonymous", &device_path, method, "no authenticated user");
                return Err(Error::Forbidden(
                    "telescope access requires an authenticated user".to_string(),
                ));
            }
        };

        let action = DeviceAction::from_method(method);
        match self.permission_for(user_id, telescope_id).await? {
            Some(level) if level.allows(action) => Ok(()),
            Some(_) => {
                self.audit_denial(user_id, &device_path, method, "insufficient permission level");
                Err(Error::Forbidden(format!(
                    "permission level does not allow {:?}",
                    action
                )))
            }
            None => {
                self.audit_denial(user_id, &device_path, method, "no grant");
                Err(Error::Forbidden(format!(
                    "no telescope grant for user {}",
                    user_id
                )))
            }
        }
    }

    fn audit_denial(&self, user_id: &str, device_path: &str, method: &Method, reason: &str) {
        self.audit.record(
            &AuditRecord::new(
                user_id,
                device_path,
                "telescope",
                format!("{:?}", DeviceAction::from_method(method)).to_lowercase(),
                "",
                AuditOutcome::Rejected,
            )
            .with_reason(reason),
        );
    }

    /// Middleware entry point; applies only to device API paths
    pub async fn middleware(
        State(authorizer): State<Arc<TelescopeAuthorizer>>,
        request: Request,
        next: Next,
    ) -> std::result::Result<Response, Error> {
        let Some((device_type, device_number, _method_name)) =
            parse_device_path(request.uri().path())
        else {
            return Ok(next.run(request).await);
        };

        let user = request.extensions().get::<AuthenticatedUser>().cloned();
        authorizer
            .authorize(user.as_ref(), &device_type, device_number, request.method())
            .await?;

        Ok(next.run(request).await)
    }
}
