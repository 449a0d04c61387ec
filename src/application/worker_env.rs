//! Spawn environment and command construction for worker processes.
//!
//! Workers start with either the full parent environment or a
//! glob-filtered subset, overlaid with configured variables whose values
//! support `${VAR}` expansion against the parent environment. `AGENT` and
//! `WORKSPACE` are always injected, plus the server's RPC URL when one is
//! listening.

use std::collections::HashMap;
use std::path::Path;

use glob::Pattern;

use crate::domain::models::WorkerTypeConfig;

/// Environment variable carrying the instance id.
pub const ENV_AGENT: &str = "AGENT";
/// Environment variable carrying the effective workspace path.
pub const ENV_WORKSPACE: &str = "WORKSPACE";
/// Environment variable carrying the server's RPC URL.
pub const ENV_RPC_URL: &str = "TANDEM_RPC_URL";

/// Build the full environment map for one worker instance.
pub fn build_environment(
    config: &WorkerTypeConfig,
    instance_id: &str,
    workspace: &Path,
    rpc_url: Option<&str>,
) -> HashMap<String, String> {
    let parent: HashMap<String, String> = std::env::vars().collect();

    let mut env: HashMap<String, String> = if config.env_inherit {
        parent.clone()
    } else if config.env_include.is_empty() {
        HashMap::new()
    } else {
        let patterns: Vec<Pattern> = config
            .env_include
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();
        parent
            .iter()
            .filter(|(key, _)| patterns.iter().any(|p| p.matches(key)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };

    // Configured variables overlay whatever came from the parent.
    for (key, value) in &config.env {
        env.insert(key.clone(), expand_vars(value, &parent));
    }

    env.insert(ENV_AGENT.to_string(), instance_id.to_string());
    env.insert(
        ENV_WORKSPACE.to_string(),
        workspace.to_string_lossy().into_owned(),
    );
    if let Some(url) = rpc_url {
        env.insert(ENV_RPC_URL.to_string(), url.to_string());
    }

    env
}

/// Expand the `{workspace}` placeholder in a command template.
pub fn expand_command(template: &str, workspace: &Path) -> String {
    template.replace("{workspace}", &workspace.to_string_lossy())
}

/// Expand `${VAR}` references against the given environment. Unknown
/// variables expand to the empty string.
fn expand_vars(value: &str, parent: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                if let Some(v) = parent.get(name) {
                    out.push_str(v);
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference: keep it literally.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn worker_config() -> WorkerTypeConfig {
        WorkerTypeConfig {
            name: "claude-code".to_string(),
            command: "claude --workspace {workspace}".to_string(),
            instances: 1,
            max_tasks: 1,
            capabilities: vec![],
            cooldown_sec: 30,
            timeout_sec: 0,
            max_retries: 3,
            retry_delay_sec: 10,
            starting_window_sec: 120,
            env_inherit: true,
            env_include: vec![],
            env: HashMap::new(),
        }
    }

    #[test]
    fn test_injected_variables() {
        let config = worker_config();
        let env = build_environment(
            &config,
            "claude-code-1",
            Path::new("/proj"),
            Some("tcp://127.0.0.1:7341"),
        );
        assert_eq!(env.get(ENV_AGENT).map(String::as_str), Some("claude-code-1"));
        assert_eq!(env.get(ENV_WORKSPACE).map(String::as_str), Some("/proj"));
        assert_eq!(
            env.get(ENV_RPC_URL).map(String::as_str),
            Some("tcp://127.0.0.1:7341")
        );
    }

    #[test]
    fn test_filtered_environment() {
        std::env::set_var("TANDEM_TEST_KEEP", "yes");
        std::env::set_var("TANDEM_TEST_DROP_ME", "no");

        let mut config = worker_config();
        config.env_inherit = false;
        config.env_include = vec!["TANDEM_TEST_KEEP".to_string()];

        let env = build_environment(&config, "w-1", Path::new("/p"), None);
        assert_eq!(env.get("TANDEM_TEST_KEEP").map(String::as_str), Some("yes"));
        assert!(!env.contains_key("TANDEM_TEST_DROP_ME"));
        // Injected variables survive filtering.
        assert!(env.contains_key(ENV_AGENT));
    }

    #[test]
    fn test_glob_patterns_select_families() {
        std::env::set_var("TANDEM_GLOB_A", "1");
        std::env::set_var("TANDEM_GLOB_B", "2");

        let mut config = worker_config();
        config.env_inherit = false;
        config.env_include = vec!["TANDEM_GLOB_*".to_string()];

        let env = build_environment(&config, "w-1", Path::new("/p"), None);
        assert!(env.contains_key("TANDEM_GLOB_A"));
        assert!(env.contains_key("TANDEM_GLOB_B"));
    }

    #[test]
    fn test_overlay_with_expansion() {
        std::env::set_var("TANDEM_TEST_HOMEISH", "/home/me");

        let mut config = worker_config();
        config.env.insert(
            "CACHE_DIR".to_string(),
            "${TANDEM_TEST_HOMEISH}/.cache".to_string(),
        );
        config
            .env
            .insert("PLAIN".to_string(), "no-expansion".to_string());
        config
            .env
            .insert("MISSING".to_string(), "${TANDEM_TEST_ABSENT}".to_string());

        let env = build_environment(&config, "w-1", Path::new("/p"), None);
        assert_eq!(
            env.get("CACHE_DIR").map(String::as_str),
            Some("/home/me/.cache")
        );
        assert_eq!(env.get("PLAIN").map(String::as_str), Some("no-expansion"));
        assert_eq!(env.get("MISSING").map(String::as_str), Some(""));
    }

    #[test]
    fn test_unterminated_reference_kept() {
        let parent = HashMap::new();
        assert_eq!(expand_vars("abc${OOPS", &parent), "abc${OOPS");
    }

    #[test]
    fn test_command_expansion() {
        let cmd = expand_command(
            "claude --workspace {workspace}",
            &PathBuf::from("/work/project"),
        );
        assert_eq!(cmd, "claude --workspace /work/project");

        assert_eq!(expand_command("claude", Path::new("/x")), "claude");
    }
}
