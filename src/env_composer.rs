/// Builds the environment a service's process is launched with, layering
/// sources from lowest to highest precedence: the OS environment, an ambient
/// context map supplied by the orchestrator, a project `.env` file, the
/// service's own declared entries, and finally `SERVICE_URL_*`/
/// `SERVICE_PORT_*`/`SERVICE_HOST_*` variables synthesised for every other
/// running service. `${VAR}` references in the service's own entries are
/// substituted against everything composed so far.

use std::collections::HashMap;
use std::path::Path;

use crate::manifest::Service;

pub struct ServiceEndpoint {
    pub name: String,
    pub host: String,
    pub port: u16,
}

pub fn resolve_environment(
    service: &Service,
    ambient: &HashMap<String, String>,
    project_dir: &Path,
    peers: &[ServiceEndpoint],
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();

    for (k, v) in ambient {
        env.insert(k.clone(), v.clone());
    }

    for (k, v) in parse_dotenv_file(&project_dir.join(".env")) {
        env.insert(k, v);
    }

    for peer in peers {
        let upper = peer.name.to_uppercase().replace('-', "_");
        env.insert(format!("SERVICE_HOST_{}", upper), peer.host.clone());
        env.insert(format!("SERVICE_PORT_{}", upper), peer.port.to_string());
        env.insert(
            format!("SERVICE_URL_{}", upper),
            format!("http://{}:{}", peer.host, peer.port),
        );
    }

    for (k, v) in service.environment_map() {
        let substituted = substitute_vars(&v, &env);
        env.insert(k, substituted);
    }

    env
}

/// Reads a project `.env` file without touching the process-wide
/// environment — `dotenv::from_path_iter` parses the same `K=V`/quoting/
/// comment rules the crate uses for `dotenv::dotenv()` but hands back an
/// iterator instead of mutating `std::env`, which is what a layered,
/// per-service composition needs.
fn parse_dotenv_file(path: &Path) -> Vec<(String, String)> {
    let Ok(iter) = dotenv::from_path_iter(path) else {
        return Vec::new();
    };
    iter.filter_map(|entry| entry.ok()).collect()
}

/// Replaces `${VAR}` references against `env`; an undefined reference
/// resolves to an empty string rather than being left literal.
fn substitute_vars(value: &str, env: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var_name = &after[..end];
                result.push_str(env.get(var_name).map(|s| s.as_str()).unwrap_or(""));
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn service_with_env(yaml: &str) -> Service {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn dotenv_file_is_parsed_and_quotes_stripped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".env"), "# comment\nFOO=bar\nBAZ=\"qux\"\n\nQUOTED='single'").unwrap();
        let service = service_with_env("project: .");
        let env = resolve_environment(&service, &HashMap::new(), dir.path(), &[]);
        assert_eq!(env.get("FOO").unwrap(), "bar");
        assert_eq!(env.get("BAZ").unwrap(), "qux");
        assert_eq!(env.get("QUOTED").unwrap(), "single");
    }

    #[test]
    fn peer_endpoints_synthesise_service_url_vars() {
        let dir = tempdir().unwrap();
        let service = service_with_env("project: .");
        let peers = vec![ServiceEndpoint {
            name: "db".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5432,
        }];
        let env = resolve_environment(&service, &HashMap::new(), dir.path(), &peers);
        assert_eq!(env.get("SERVICE_PORT_DB").unwrap(), "5432");
        assert_eq!(env.get("SERVICE_URL_DB").unwrap(), "http://127.0.0.1:5432");
    }

    #[test]
    fn service_env_can_reference_composed_variables() {
        let dir = tempdir().unwrap();
        let service = service_with_env("project: .\nenvironment:\n  DATABASE_URL: \"${SERVICE_URL_DB}/app\"");
        let peers = vec![ServiceEndpoint {
            name: "db".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5432,
        }];
        let env = resolve_environment(&service, &HashMap::new(), dir.path(), &peers);
        assert_eq!(env.get("DATABASE_URL").unwrap(), "http://127.0.0.1:5432/app");
    }

    #[test]
    fn undefined_variable_reference_resolves_to_empty_string() {
        let dir = tempdir().unwrap();
        let service = service_with_env("project: .\nenvironment:\n  MISSING: \"${NEVER_SET}\"");
        let env = resolve_environment(&service, &HashMap::new(), dir.path(), &[]);
        assert_eq!(env.get("MISSING").unwrap(), "");
    }
}
