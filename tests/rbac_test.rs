use std::collections::HashSet;

use starberry_auth::config::AuthConfig;
use starberry_auth::rbac::{RbacUser, Resource, RoleGraph};

fn config() -> AuthConfig {
    AuthConfig::from_json_str(
        r#"{
            "secret": "0123456789abcdef0123456789abcdef",
            "rbac": {
                "roles": {
                    "A": {"permissions": ["x"], "inherits": ["B"]},
                    "B": {"permissions": ["y"], "inherits": ["A"]},
                    "author": {"permissions": ["post:edit:own"]},
                    "root": {}
                },
                "default_role": "author",
                "super_admin_role": "root"
            }
        }"#,
    )
    .unwrap()
}

#[test]
fn test_cyclic_inheritance_terminates() {
    let config = config();
    config.validate().unwrap();
    let graph = RoleGraph::from_config(&config.rbac);
    let user = RbacUser::new("u1").with_roles(["A"]);

    let permissions = graph.get_effective_permissions(&user);
    assert_eq!(permissions, HashSet::from(["x".to_string(), "y".to_string()]));
    assert!(graph.has_all_roles(&user, &["A", "B"]));
}

#[test]
fn test_super_admin_has_any_permission() {
    let graph = RoleGraph::from_config(&config().rbac);
    let admin = RbacUser::new("admin").with_roles(["root"]);
    assert!(graph.has_permission(&admin, "never:configured:anywhere", None));
    assert!(graph.has_all_permissions(&admin, &["a", "b", "c"], None));
}

#[test]
fn test_default_role_grants_ownership_scoped_edit() {
    let graph = RoleGraph::from_config(&config().rbac);
    let user = RbacUser::new("u1");
    assert!(graph.has_permission(&user, "post:edit", Some(&Resource::owned_by("u1"))));
    assert!(!graph.has_permission(&user, "post:edit", Some(&Resource::owned_by("u2"))));
    assert!(!graph.has_permission(&user, "post:edit", None));
}
