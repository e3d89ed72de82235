//! Role-based access control
//!
//! One explicit permission table mapping (role, resource, verb) to allow,
//! evaluated once per request by handlers.

use crate::AppError;
use crate::models::Role;
use super::auth::UserContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Devices,
    Policies,
    Events,
    Incidents,
    Forensics,
    AuditLogs,
    Users,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Read,
    Write,
}

/// The permission table
pub fn role_allows(role: Role, resource: Resource, verb: Verb) -> bool {
    use Resource::*;
    use Verb::*;

    match role {
        Role::Superadmin => true,
        Role::Security => matches!(
            (resource, verb),
            (Events, Read)
                | (Incidents, Read)
                | (Incidents, Write)
                | (Forensics, Read)
                | (AuditLogs, Read)
        ),
        Role::ItAdmin => matches!(
            (resource, verb),
            (Devices, Read) | (Devices, Write) | (Policies, Read) | (Policies, Write)
        ),
        Role::Auditor => matches!((resource, verb), (Forensics, Read) | (AuditLogs, Read)),
    }
}

/// Check a request against the permission table
pub fn require(user: &UserContext, resource: Resource, verb: Verb) -> Result<(), AppError> {
    if !role_allows(user.role, resource, verb) {
        tracing::warn!(
            "Denied {:?} {:?} for user {} with role {}",
            verb, resource, user.user_id, user.role.as_str()
        );
        return Err(AppError::Forbidden);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_RESOURCES: [Resource; 7] = [
        Resource::Devices,
        Resource::Policies,
        Resource::Events,
        Resource::Incidents,
        Resource::Forensics,
        Resource::AuditLogs,
        Resource::Users,
    ];

    #[test]
    fn superadmin_is_allowed_everything() {
        for resource in ALL_RESOURCES {
            assert!(role_allows(Role::Superadmin, resource, Verb::Read));
            assert!(role_allows(Role::Superadmin, resource, Verb::Write));
        }
    }

    #[test]
    fn auditor_reads_forensics_but_writes_nothing() {
        assert!(role_allows(Role::Auditor, Resource::Forensics, Verb::Read));
        assert!(role_allows(Role::Auditor, Resource::AuditLogs, Verb::Read));
        for resource in ALL_RESOURCES {
            assert!(!role_allows(Role::Auditor, resource, Verb::Write));
        }
        assert!(!role_allows(Role::Auditor, Resource::Devices, Verb::Read));
    }

    #[test]
    fn security_writes_incidents_only() {
        assert!(role_allows(Role::Security, Resource::Incidents, Verb::Write));
        assert!(role_allows(Role::Security, Resource::Events, Verb::Read));
        assert!(role_allows(Role::Security, Resource::Forensics, Verb::Read));
        assert!(!role_allows(Role::Security, Resource::Devices, Verb::Write));
        assert!(!role_allows(Role::Security, Resource::Policies, Verb::Write));
        assert!(!role_allows(Role::Security, Resource::Users, Verb::Read));
    }

    #[test]
    fn it_admin_manages_devices_and_policies() {
        assert!(role_allows(Role::ItAdmin, Resource::Devices, Verb::Write));
        assert!(role_allows(Role::ItAdmin, Resource::Policies, Verb::Write));
        assert!(!role_allows(Role::ItAdmin, Resource::Incidents, Verb::Read));
        assert!(!role_allows(Role::ItAdmin, Resource::Forensics, Verb::Read));
        assert!(!role_allows(Role::ItAdmin, Resource::Users, Verb::Write));
    }
}
