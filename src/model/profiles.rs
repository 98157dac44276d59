use crate::conf::DevAttributes;
use crate::errors::Error;
use core::time::Duration;
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;

/// Username prompt shared by the login-chat models.
const DEFAULT_USERNAME_PROMPT: &str = r"(?i)(username|login):\s*$";

/// Password prompt shared by the login-chat models.
const DEFAULT_PASSWORD_PROMPT: &str = r"(?i)password:\s*$";

/// `ModelTable` maps model names to the attribute profile a new device of
/// that model starts from. Profiles are the only thing that varies between
/// vendors; the dialogue itself is one state machine.
#[derive(Default)]
pub struct ModelTable {
    models: Mutex<HashMap<String, DevAttributes>>,
}

impl ModelTable {
    /// Returns an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a registry pre-loaded with the built-in profiles.
    #[allow(clippy::expect_used)]
    #[must_use]
    pub fn with_builtin_models() -> Self {
        let table = Self::new();

        register_builtin_models(&table).expect("builtin model names cannot collide");

        table
    }

    /// Registers a model profile, rejecting duplicate names.
    #[allow(clippy::expect_used)]
    pub fn register(
        &self,
        name: &str,
        attr: DevAttributes,
    ) -> Result<(), Error> {
        let mut models = self.models.lock().expect("model table lock poisoned");

        if models.contains_key(name) {
            return Err(Error::Config(format!("duplicate model name '{name}'")));
        }

        debug!("model table: registered '{name}'");

        models.insert(name.to_owned(), attr);

        Ok(())
    }

    /// Returns a copy of the named profile.
    #[allow(clippy::expect_used)]
    pub fn get(
        &self,
        name: &str,
    ) -> Option<DevAttributes> {
        self.models
            .lock()
            .expect("model table lock poisoned")
            .get(name)
            .cloned()
    }
}

/// Registers every built-in vendor profile.
pub fn register_builtin_models(table: &ModelTable) -> Result<(), Error> {
    table.register("cisco-ios", model_cisco_ios())?;
    table.register("cisco-iosxr", model_cisco_iosxr())?;
    table.register("junos", model_junos())?;
    table.register("linux", model_linux())?;
    table.register("mikrotik", model_mikrotik())?;
    table.register("run", model_run())?;

    Ok(())
}

fn model_cisco_ios() -> DevAttributes {
    DevAttributes {
        need_login_chat: true,
        need_enabled_mode: true,
        need_paging_off: true,
        enable_command: String::from("enable"),
        username_prompt_pattern: DEFAULT_USERNAME_PROMPT.to_owned(),
        password_prompt_pattern: DEFAULT_PASSWORD_PROMPT.to_owned(),
        enable_password_prompt_pattern: DEFAULT_PASSWORD_PROMPT.to_owned(),
        disabled_prompt_pattern: String::from(r">\s*$"),
        enabled_prompt_pattern: String::from(r"#\s*$"),
        command_list: vec![String::from("show running-config")],
        disable_pager_command: String::from("term len 0"),
        read_timeout: Duration::from_secs(10),
        match_timeout: Duration::from_secs(20),
        send_timeout: Duration::from_secs(5),
        command_read_timeout: Duration::from_secs(20),
        command_match_timeout: Duration::from_secs(60),
        ..DevAttributes::default()
    }
}

fn model_cisco_iosxr() -> DevAttributes {
    DevAttributes {
        line_filter: String::from("iosxr"),
        changes_only: true,
        ..model_cisco_ios()
    }
}

fn model_junos() -> DevAttributes {
    DevAttributes {
        need_login_chat: true,
        need_enabled_mode: false,
        need_paging_off: true,
        username_prompt_pattern: DEFAULT_USERNAME_PROMPT.to_owned(),
        password_prompt_pattern: DEFAULT_PASSWORD_PROMPT.to_owned(),
        enabled_prompt_pattern: String::from(r"[>%]\s*$"),
        command_list: vec![String::from("show configuration | display set")],
        disable_pager_command: String::from("set cli screen-length 0"),
        // the shell prompt printed right after login is still outstanding
        // when the pager command goes out, so consume one extra
        disable_pager_extra_prompt_count: 1,
        read_timeout: Duration::from_secs(10),
        match_timeout: Duration::from_secs(20),
        send_timeout: Duration::from_secs(5),
        command_read_timeout: Duration::from_secs(20),
        command_match_timeout: Duration::from_secs(60),
        ..DevAttributes::default()
    }
}

fn model_linux() -> DevAttributes {
    DevAttributes {
        need_login_chat: true,
        username_prompt_pattern: DEFAULT_USERNAME_PROMPT.to_owned(),
        password_prompt_pattern: DEFAULT_PASSWORD_PROMPT.to_owned(),
        enabled_prompt_pattern: String::from(r"[$#]\s*$"),
        command_list: vec![String::from("cat /etc/network/interfaces")],
        read_timeout: Duration::from_secs(10),
        match_timeout: Duration::from_secs(20),
        send_timeout: Duration::from_secs(5),
        command_read_timeout: Duration::from_secs(20),
        command_match_timeout: Duration::from_secs(60),
        ..DevAttributes::default()
    }
}

fn model_mikrotik() -> DevAttributes {
    DevAttributes {
        need_login_chat: true,
        username_prompt_pattern: DEFAULT_USERNAME_PROMPT.to_owned(),
        password_prompt_pattern: DEFAULT_PASSWORD_PROMPT.to_owned(),
        // routeros multiplexes terminal detection into the login banner
        post_login_prompt_pattern: String::from(r#"Please press "Enter" to continue!"#),
        post_login_prompt_response: String::from("\r\n"),
        username_append: String::from("+cte"),
        enabled_prompt_pattern: String::from(r"\]\s?>\s*$"),
        command_list: vec![String::from("/export")],
        read_timeout: Duration::from_secs(10),
        match_timeout: Duration::from_secs(20),
        send_timeout: Duration::from_secs(5),
        command_read_timeout: Duration::from_secs(20),
        command_match_timeout: Duration::from_secs(60),
        ..DevAttributes::default()
    }
}

fn model_run() -> DevAttributes {
    DevAttributes {
        // run_prog is filled per device; the profile only carries the budget
        run_timeout: Duration::from_secs(60),
        ..DevAttributes::default()
    }
}

#[cfg(test)]
mod tests {
    use super::ModelTable;
    use crate::conf::DevAttributes;

    #[test]
    fn builtin_profiles_present() {
        let table = ModelTable::with_builtin_models();

        for name in ["cisco-ios", "cisco-iosxr", "junos", "linux", "mikrotik", "run"] {
            assert!(table.get(name).is_some(), "missing builtin model {name}");
        }

        assert!(table.get("vax-vms").is_none());
    }

    #[test]
    fn profiles_differ_only_in_attributes() {
        let table = ModelTable::with_builtin_models();

        let ios = table.get("cisco-ios").unwrap();
        assert!(ios.need_enabled_mode);
        assert!(ios.line_filter.is_empty());

        let iosxr = table.get("cisco-iosxr").unwrap();
        assert_eq!(iosxr.line_filter, "iosxr");
        assert!(iosxr.changes_only);

        let junos = table.get("junos").unwrap();
        assert!(!junos.need_enabled_mode);
        assert!(junos.need_paging_off);

        let mikrotik = table.get("mikrotik").unwrap();
        assert_eq!(mikrotik.username_append, "+cte");
        assert!(!mikrotik.post_login_prompt_pattern.is_empty());
    }

    #[test]
    fn duplicate_model_rejected() {
        let table = ModelTable::with_builtin_models();

        assert!(table
            .register("cisco-ios", DevAttributes::default())
            .is_err());
    }

    #[test]
    fn profile_copies_are_independent() {
        let table = ModelTable::with_builtin_models();

        let mut copy = table.get("cisco-ios").unwrap();
        copy.command_list.push(String::from("show version"));

        assert_eq!(table.get("cisco-ios").unwrap().command_list.len(), 1);
    }
}
