//! Role-based access control over a static role graph.
//!
//! Roles inherit from other roles by name. Inheritance is transitive and the
//! graph may contain cycles; closures are computed breadth-first with a
//! visited set, so every query terminates.
//!
//! Permission strings are opaque except for two conventions:
//! - `*` grants everything. The configured super-admin role implies it.
//! - a `:own` suffix scopes a permission to resources the user owns
//!   (`post:edit:own`). Ownership compares `Resource::owner_id` to the user id.
//!   Holding the unscoped permission also satisfies its `:own` form.
//!
//! All results are sets; no ordering is implied.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RbacConfig;

pub const WILDCARD: &str = "*";
pub const OWN_SUFFIX: &str = ":own";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    pub permissions: HashSet<String>,
    pub inherits: HashSet<String>,
}

/// A principal as seen by authorization checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RbacUser {
    pub id: String,
    #[serde(default)]
    pub roles: HashSet<String>,
    /// Direct grants on top of role permissions.
    #[serde(default)]
    pub permissions: HashSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RbacUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Self::default() }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }
}

/// The object a permission is checked against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    pub owner_id: Option<String>,
}

impl Resource {
    pub fn owned_by(owner_id: impl Into<String>) -> Self {
        Self { owner_id: Some(owner_id.into()) }
    }

    fn is_owned_by(&self, user: &RbacUser) -> bool {
        self.owner_id.as_deref() == Some(user.id.as_str())
    }
}

/// Immutable role graph, loaded once from configuration.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    roles: HashMap<String, Role>,
    default_role: Option<String>,
    super_admin_role: Option<String>,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RbacConfig) -> Self {
        let mut graph = Self::new();
        for (name, role) in &config.roles {
            graph = graph.role(name, role.permissions.iter().cloned(), role.inherits.iter().cloned());
        }
        graph.default_role = config.default_role.clone();
        graph.super_admin_role = config.super_admin_role.clone();
        graph
    }

    pub fn role<P, I>(mut self, name: &str, permissions: P, inherits: I) -> Self
    where
        P: IntoIterator<Item = String>,
        I: IntoIterator<Item = String>,
    {
        self.roles.insert(
            name.to_string(),
            Role {
                name: name.to_string(),
                permissions: permissions.into_iter().collect(),
                inherits: inherits.into_iter().collect(),
            },
        );
        self
    }

    pub fn with_default_role(mut self, role: impl Into<String>) -> Self {
        self.default_role = Some(role.into());
        self
    }

    pub fn with_super_admin_role(mut self, role: impl Into<String>) -> Self {
        self.super_admin_role = Some(role.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Role> {
        self.roles.get(name)
    }

    /// Direct roles (or the default role when there are none) plus everything
    /// they inherit. Unknown role names are kept but contribute nothing.
    pub fn get_effective_roles(&self, user: &RbacUser) -> HashSet<String> {
        let mut queue: VecDeque<String> = if user.roles.is_empty() {
            self.default_role.iter().cloned().collect()
        } else {
            user.roles.iter().cloned().collect()
        };
        let mut visited = HashSet::new();
        while let Some(name) = queue.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            }
            if let Some(role) = self.roles.get(&name) {
                queue.extend(role.inherits.iter().filter(|r| !visited.contains(*r)).cloned());
            }
        }
        visited
    }

    /// Union of role permissions and direct grants; `{"*"}` for super admins.
    pub fn get_effective_permissions(&self, user: &RbacUser) -> HashSet<String> {
        let roles = self.get_effective_roles(user);
        if self.super_admin_role.as_ref().is_some_and(|admin| roles.contains(admin)) {
            return HashSet::from([WILDCARD.to_string()]);
        }
        let mut permissions = user.permissions.clone();
        for role in roles.iter().filter_map(|name| self.roles.get(name)) {
            permissions.extend(role.permissions.iter().cloned());
        }
        permissions
    }

    pub fn has_role(&self, user: &RbacUser, role: &str) -> bool {
        self.get_effective_roles(user).contains(role)
    }

    pub fn has_any_role(&self, user: &RbacUser, roles: &[&str]) -> bool {
        let effective = self.get_effective_roles(user);
        roles.iter().any(|r| effective.contains(*r))
    }

    pub fn has_all_roles(&self, user: &RbacUser, roles: &[&str]) -> bool {
        let effective = self.get_effective_roles(user);
        roles.iter().all(|r| effective.contains(*r))
    }

    /// `resource` is consulted for ownership-scoped grants only. Asking for
    /// `post:edit` on a resource the user owns is satisfied by `post:edit:own`.
    pub fn has_permission(&self, user: &RbacUser, permission: &str, resource: Option<&Resource>) -> bool {
        self.permission_granted(&self.get_effective_permissions(user), user, permission, resource)
    }

    pub fn has_any_permission(&self, user: &RbacUser, permissions: &[&str], resource: Option<&Resource>) -> bool {
        let effective = self.get_effective_permissions(user);
        permissions.iter().any(|p| self.permission_granted(&effective, user, p, resource))
    }

    pub fn has_all_permissions(&self, user: &RbacUser, permissions: &[&str], resource: Option<&Resource>) -> bool {
        let effective = self.get_effective_permissions(user);
        permissions.iter().all(|p| self.permission_granted(&effective, user, p, resource))
    }

    fn permission_granted(
        &self,
        effective: &HashSet<String>,
        user: &RbacUser,
        permission: &str,
        resource: Option<&Resource>,
    ) -> bool {
        if effective.contains(WILDCARD) {
            return true;
        }
        let owns = resource.is_some_and(|r| r.is_owned_by(user));
        if let Some(base) = permission.strip_suffix(OWN_SUFFIX) {
            return owns && (effective.contains(permission) || effective.contains(base));
        }
        effective.contains(permission) || (owns && effective.contains(&format!("{}{}", permission, OWN_SUFFIX)))
    }
}
