//! Shell script builders for init jobs.
//!
//! Every script must be safe to run more than once: commands either check for
//! existing state first or pass `--ignore-existing`. The output is plain text
//! so that the script hash alone decides whether a job must be rerun.

use crate::resources::common::sha256_hex;

/// Path of the native client config mounted into init job pods.
pub const CLIENT_CONFIG_PATH: &str = "/config/client.yson";

const YT: &str = "/usr/bin/yt";

/// One access control entry of a Cypress node ACL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ace {
    pub action: &'static str,
    pub subjects: Vec<&'static str>,
    pub permissions: Vec<&'static str>,
}

impl Ace {
    pub fn allow(subjects: &[&'static str], permissions: &[&'static str]) -> Self {
        Self {
            action: "allow",
            subjects: subjects.to_vec(),
            permissions: permissions.to_vec(),
        }
    }

    /// YSON text form, e.g. `{action=allow;subjects=[users];permissions=[read]}`.
    pub fn to_yson(&self) -> String {
        format!(
            "{{action={};subjects=[{}];permissions=[{}]}}",
            self.action,
            self.subjects.join(";"),
            self.permissions.join(";")
        )
    }
}

/// Header of every init script.
pub fn prologue() -> String {
    [
        "set -e",
        "set -x",
        format!("export YT_DRIVER_CONFIG_PATH={CLIENT_CONFIG_PATH}").as_str(),
    ]
    .join("\n")
}

/// Run `commands` only when the shell test `condition` holds.
pub fn run_if_condition(condition: &str, commands: &[String]) -> String {
    format!("if [ {} ]; then\n{}\nfi", condition, commands.join("\n"))
}

/// Run `commands` only when the Cypress node `path` exists.
pub fn run_if_exists(path: &str, commands: &[String]) -> String {
    run_if_condition(&format!("\"$({YT} exists {path})\" = \"true\""), commands)
}

/// Run `commands` only when the Cypress node `path` does not exist.
pub fn run_if_nonexistent(path: &str, commands: &[String]) -> String {
    run_if_condition(&format!("\"$({YT} exists {path})\" = \"false\""), commands)
}

/// Set `path` to `value` unless it is already set.
pub fn set_with_ignore_existing(path: &str, value: &str) -> String {
    run_if_nonexistent(path, &[format!("{YT} set {path} {value}")])
}

/// Replace the ACL of `path`.
pub fn set_path_acl(path: &str, acl: &[Ace]) -> String {
    let entries: Vec<String> = acl.iter().map(Ace::to_yson).collect();
    format!("{YT} set {path}/@acl '[{}]'", entries.join(";"))
}

/// Commands creating a user with a password and an API token.
pub fn create_user_commands(
    login: &str,
    password: &str,
    token: &str,
    superuser: bool,
) -> Vec<String> {
    let mut commands = vec![
        format!("{YT} create user --attributes '{{name=\"{login}\"}}' --ignore-existing"),
        format!(
            "{YT} execute set_user_password '{{user={login};new_password_sha256=\"{}\"}}'",
            sha256_hex(password.as_bytes())
        ),
        format!("{YT} set //sys/tokens/{} {login}", sha256_hex(token.as_bytes())),
    ];
    if superuser {
        commands.push(format!("{YT} add-member {login} superusers || true"));
    }
    commands
}

/// Create the `admins` group.
pub fn init_groups() -> String {
    format!("{YT} create group --attr '{{name=admins}}' --ignore-existing")
}

/// Restrict who may create objects of the system types.
pub fn init_schema_acls() -> String {
    let user_read = Ace::allow(&["users"], &["read"]);
    let user_read_create = Ace::allow(&["users"], &["read", "create"]);
    let user_read_write_create = Ace::allow(&["users"], &["read", "write", "create"]);
    let admin = Ace::allow(
        &["admins"],
        &["read", "write", "administer", "create", "remove"],
    );

    let mut commands = Vec::new();

    // Only admins may create these
    for object_type in [
        "tablet_cell",
        "tablet_action",
        "tablet_cell_bundle",
        "user",
        "group",
        "rack",
        "data_center",
        "cluster_node",
        "access_control_object_namespace",
        "access_control_object_namespace_map",
    ] {
        commands.push(set_path_acl(
            &format!("//sys/schemas/{object_type}"),
            &[user_read.clone(), admin.clone()],
        ));
    }

    // `medium` was renamed to `domestic_medium` in newer releases
    commands.push(format!(
        "{} || {}",
        set_path_acl("//sys/schemas/medium", &[user_read.clone(), admin.clone()]),
        set_path_acl(
            "//sys/schemas/domestic_medium",
            &[user_read_create.clone(), admin.clone()]
        )
    ));

    for object_type in [
        "account",
        "scheduler_pool",
        "scheduler_pool_tree",
        "access_control_object",
    ] {
        commands.push(set_path_acl(
            &format!("//sys/schemas/{object_type}"),
            &[user_read_create.clone(), admin.clone()],
        ));
    }

    commands.push(set_path_acl(
        "//sys/schemas/account_resource_usage_lease",
        &[user_read_write_create, admin],
    ));

    commands.join("\n")
}

/// Create every medium in `media` that does not exist yet.
pub fn init_media(media: &[String]) -> String {
    media
        .iter()
        .map(|medium| {
            format!(
                "{YT} get //sys/media/{medium}/@name || {YT} create medium --attr '{{name={medium}}}'"
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cell id of the primary master cell with the given tag.
pub fn primary_cell_id(cell_tag: i32) -> String {
    format!("{cell_tag:x}-ffffffff-{cell_tag:x}0259-ffffffff")
}

/// Cluster connection attribute in YSON text form.
pub fn cluster_connection(cell_tag: i32, master_addresses: &[String]) -> String {
    let addresses: Vec<String> = master_addresses
        .iter()
        .map(|address| format!("\"{address}\""))
        .collect();
    format!(
        "{{primary_master={{cell_id=\"{}\";addresses=[{}]}}}}",
        primary_cell_id(cell_tag),
        addresses.join(";")
    )
}

/// Admin login, password and token used by the bootstrap script.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminCredentials {
    pub login: String,
    pub password: String,
    pub token: String,
}

impl Default for AdminCredentials {
    fn default() -> Self {
        Self {
            login: "admin".to_string(),
            password: "password".to_string(),
            token: "password".to_string(),
        }
    }
}

impl std::fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

/// Inputs of the master bootstrap script.
#[derive(Clone, Debug)]
pub struct MasterInit<'a> {
    pub cell_tag: i32,
    pub master_addresses: &'a [String],
    pub admin: &'a AdminCredentials,
    pub extra_media: &'a [String],
}

/// Bootstrap script of a fresh cluster.
pub fn master_init_script(init: &MasterInit<'_>) -> String {
    let admin_user = run_if_nonexistent(
        &format!("//sys/users/{}", init.admin.login),
        &create_user_commands(
            &init.admin.login,
            &init.admin.password,
            &init.admin.token,
            true,
        ),
    );

    let mut script = vec![
        prologue(),
        init_groups(),
        run_if_exists("//sys/@provision_lock", &[init_schema_acls()]),
        format!(
            "{YT} create scheduler_pool_tree --attributes '{{name=default; config={{nodes_filter=\"\"}}}}' --ignore-existing"
        ),
        set_with_ignore_existing("//sys/pool_trees/@default_tree", "default"),
        run_if_nonexistent(
            "//sys/pools",
            &[format!("{YT} link //sys/pool_trees/default //sys/pools")],
        ),
        format!(
            "{YT} create scheduler_pool --attributes '{{name=research; pool_tree=default}}' --ignore-existing"
        ),
        format!("{YT} create map_node //home --ignore-existing"),
        run_if_exists(
            "//sys/@provision_lock",
            &[format!(
                "{YT} set //sys/@cluster_connection '{}'",
                cluster_connection(init.cell_tag, init.master_addresses)
            )],
        ),
        set_with_ignore_existing(
            "//sys/controller_agents/config/operation_options/spec_template",
            "'{enable_partitioned_data_balancing=%false}' -r",
        ),
        admin_user,
    ];

    let media = init_media(init.extra_media);
    if !media.is_empty() {
        script.push(media);
    }
    script.push(format!("{YT} remove //sys/@provision_lock -f"));

    script.join("\n")
}

/// Take the masters out of read-only mode after an update.
pub fn exit_read_only_script() -> String {
    [
        prologue(),
        "export YT_LOG_LEVEL=DEBUG".to_string(),
        // Older releases boot straight into read-write mode
        r#"[[ "$YTSAURUS_VERSION" < "23.2" ]] && echo "master_exit_read_only is supported since 23.2, nothing to do" && exit 0"#
            .to_string(),
        format!("{YT} execute master_exit_read_only '{{}}'"),
    ]
    .join("\n")
}
