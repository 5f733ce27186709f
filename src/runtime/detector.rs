/// The runtime detection pipeline: `Service` + project directory + port
/// allocator → `ServiceRuntime`. Strictly ordered: container short-circuit,
/// function short-circuit, language, framework, port selection, command
/// build, health profile, mode detection.

use super::framework::{
    self, classify_function_variant, detect_framework, detect_language, detect_package_manager,
    node_dev_or_start_script, package_script_contains, Framework, FunctionVariant, Language,
};
use super::{HealthCheckProfile, HealthCheckType, Protocol, ServiceRuntime};
use crate::manifest::probes::file_exists;
use crate::manifest::{parse_port_spec, Service};
use crate::ports::PortAllocator;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub fn detect_runtime(
    name: &str,
    service: &Service,
    manifest_root: &Path,
    allocator: &PortAllocator,
) -> Result<ServiceRuntime> {
    let project_dir = resolve_project_dir(manifest_root, &service.project);

    if service.is_container() {
        return detect_container_runtime(name, service, manifest_root, allocator);
    }

    if service.host.as_deref() == Some("function") {
        if file_exists(&project_dir, "host.json") {
            return detect_function_runtime(name, service, &project_dir, allocator);
        }
        return Err(anyhow!("host.json not found in {}", project_dir.display()));
    }

    let language = detect_language(&project_dir, service.language.as_deref(), service.host.as_deref())?;

    let (framework_kind, package_manager) = if language == Language::Docker {
        (None, None)
    } else {
        let (fw, pm) = detect_framework(&project_dir, language)?;
        (Some(fw), pm)
    };

    let used_ports = allocator;
    let (port, should_update_manifest) =
        select_port(name, service, &project_dir, framework_kind, language, used_ports)?;

    let (command, args, mut env) = build_command(service, &project_dir, framework_kind, package_manager, port)?;

    let mut health = default_health_profile(framework_kind, port);
    if port == 0 {
        health.r#type = HealthCheckType::Process;
    }
    apply_healthcheck_override(&mut health, service, port);

    let mode = if let Some(explicit) = service.mode {
        Some(explicit)
    } else {
        detect_mode(service, &project_dir, framework_kind, language)
    };

    for (k, v) in service.environment_map() {
        env.insert(k, v);
    }

    Ok(ServiceRuntime {
        name: name.to_string(),
        language: language.as_str().to_string(),
        framework: framework_kind.map(|f| format!("{:?}", f)),
        package_manager: package_manager.map(|p| p.as_str().to_string()),
        command,
        args,
        working_dir: project_dir,
        port,
        protocol: if port == 0 { Protocol::Process } else { Protocol::Http },
        env,
        health_check: health,
        r#type: if port == 0 { Protocol::Process } else { Protocol::Http },
        mode,
        should_update_manifest,
        container_image: None,
    })
}

fn resolve_project_dir(manifest_root: &Path, project: &str) -> PathBuf {
    let p = Path::new(project);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        manifest_root.join(p)
    }
}

// --- Container short-circuit -------------------------------------------

fn detect_container_runtime(
    name: &str,
    service: &Service,
    manifest_root: &Path,
    allocator: &PortAllocator,
) -> Result<ServiceRuntime> {
    let image = service
        .image
        .clone()
        .ok_or_else(|| anyhow!("container runtime requested without an image"))?;

    let mut port = 0u16;
    let mut should_update_manifest = false;
    for raw in &service.ports {
        let spec = parse_port_spec(raw, true)?;
        if let Some(host_port) = spec.host {
            let (assigned, update) = allocator.assign_port(name, host_port, true)?;
            port = assigned;
            should_update_manifest |= update;
        }
    }

    let mut health = HealthCheckProfile {
        r#type: HealthCheckType::Tcp,
        ..Default::default()
    };
    apply_healthcheck_override(&mut health, service, port);

    Ok(ServiceRuntime {
        name: name.to_string(),
        language: "docker".to_string(),
        framework: None,
        package_manager: None,
        command: String::new(),
        args: Vec::new(),
        working_dir: manifest_root.to_path_buf(),
        port,
        protocol: Protocol::Container,
        env: service.environment_map(),
        health_check: health,
        r#type: Protocol::Container,
        mode: None,
        should_update_manifest,
        container_image: Some(image),
    })
}

// --- Function short-circuit ---------------------------------------------

fn detect_function_runtime(
    name: &str,
    service: &Service,
    project_dir: &Path,
    allocator: &PortAllocator,
) -> Result<ServiceRuntime> {
    let variant = classify_function_variant(project_dir)?;

    let preferred = 7071u16;
    let (port, should_update_manifest) = if service.ports.is_empty() {
        (preferred, false)
    } else {
        let spec = parse_port_spec(&service.ports[0], false)?;
        allocator.assign_port(name, spec.host.unwrap_or(preferred), true)?
    };

    let mut health = HealthCheckProfile {
        r#type: HealthCheckType::Http,
        path: "/".to_string(),
        ..Default::default()
    };
    apply_healthcheck_override(&mut health, service, port);

    let mut env = service.environment_map();
    env.entry("FUNCTIONS_WORKER_RUNTIME".to_string())
        .or_insert_with(|| function_worker_runtime(variant).to_string());
    env.entry("AzureWebJobsStorage".to_string())
        .or_insert_with(|| "UseDevelopmentStorage=true".to_string());

    Ok(ServiceRuntime {
        name: name.to_string(),
        language: format!("{:?}", variant).to_lowercase(),
        framework: Some("azure-functions".to_string()),
        package_manager: None,
        command: "func".to_string(),
        args: vec!["start".to_string(), "--port".to_string(), port.to_string()],
        working_dir: project_dir.to_path_buf(),
        port,
        protocol: Protocol::Http,
        env,
        health_check: health,
        r#type: Protocol::Http,
        mode: None,
        should_update_manifest,
        container_image: None,
    })
}

fn function_worker_runtime(variant: FunctionVariant) -> &'static str {
    match variant {
        FunctionVariant::Node => "node",
        FunctionVariant::Python => "python",
        FunctionVariant::DotNet => "dotnet",
        FunctionVariant::Java => "java",
        FunctionVariant::LogicApps => "node",
    }
}

// --- Port selection -------------------------------------------------------

fn select_port(
    name: &str,
    service: &Service,
    project_dir: &Path,
    framework_kind: Option<Framework>,
    language: Language,
    allocator: &PortAllocator,
) -> Result<(u16, bool)> {
    if service.ports.is_empty() {
        return Ok((0, false));
    }

    let spec = parse_port_spec(&service.ports[0], false)?;
    let is_explicit = spec.host.is_some();
    let preferred = spec
        .host
        .or_else(|| config_file_port(project_dir, framework_kind))
        .or_else(|| env_var_port(name))
        .or_else(|| framework_default_port(framework_kind, language))
        .unwrap_or_else(|| language.default_port());

    allocator.assign_port(name, preferred, is_explicit)
}

fn config_file_port(dir: &Path, framework_kind: Option<Framework>) -> Option<u16> {
    match framework_kind {
        Some(Framework::NodeGeneric) | Some(Framework::React) | Some(Framework::Vue) => {
            let text = std::fs::read_to_string(dir.join("package.json")).ok()?;
            extract_flag_port(&text, "--port")
        }
        Some(Framework::AspNetCore) | Some(Framework::DotNetApphost) | Some(Framework::DotNetGeneric) => {
            let text = std::fs::read_to_string(
                dir.join("Properties").join("launchSettings.json"),
            )
            .ok()?;
            extract_launch_settings_port(&text)
        }
        Some(Framework::Django) => {
            let text = std::fs::read_to_string(dir.join(".env")).ok()?;
            text.lines()
                .find(|l| l.trim_start().starts_with("PORT="))
                .and_then(|l| l.split('=').nth(1))
                .and_then(|v| v.trim().parse().ok())
        }
        Some(Framework::SpringBootMaven) | Some(Framework::SpringBootGradle) => {
            let text = std::fs::read_to_string(
                dir.join("src").join("main").join("resources").join("application.properties"),
            )
            .ok()?;
            text.lines()
                .find(|l| l.trim_start().starts_with("server.port"))
                .and_then(|l| l.split('=').nth(1))
                .and_then(|v| v.trim().parse().ok())
        }
        _ => None,
    }
}

fn extract_flag_port(text: &str, flag: &str) -> Option<u16> {
    let idx = text.find(flag)?;
    let rest = &text[idx + flag.len()..];
    let digits: String = rest
        .trim_start_matches(|c: char| c == ' ' || c == '=')
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn extract_launch_settings_port(text: &str) -> Option<u16> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value
        .get("profiles")?
        .as_object()?
        .values()
        .find_map(|p| p.get("applicationUrl")?.as_str())
        .and_then(|url| url.rsplit(':').next())
        .and_then(|p| p.trim_end_matches('/').parse().ok())
}

fn env_var_port(name: &str) -> Option<u16> {
    let upper = name.to_uppercase().replace('-', "_");
    for candidate in [
        format!("{}_PORT", upper),
        "PORT".to_string(),
        "HTTP_PORT".to_string(),
        "WEB_PORT".to_string(),
        "SERVICE_PORT".to_string(),
    ] {
        if let Ok(v) = std::env::var(&candidate) {
            if let Ok(p) = v.parse() {
                return Some(p);
            }
        }
    }
    None
}

fn framework_default_port(framework_kind: Option<Framework>, language: Language) -> Option<u16> {
    match framework_kind {
        Some(Framework::Angular) => Some(4200),
        Some(Framework::Streamlit) => Some(8501),
        Some(Framework::FastApi) | Some(Framework::Flask) | Some(Framework::Django) => Some(8000),
        Some(Framework::Laravel) => Some(8000),
        _ => Some(language.default_port()),
    }
}

// --- Command build ---------------------------------------------------------

fn venv_python(dir: &Path) -> String {
    let candidates = if cfg!(windows) {
        [".venv/Scripts/python.exe", "venv/Scripts/python.exe"]
    } else {
        [".venv/bin/python", "venv/bin/python"]
    };
    for candidate in candidates {
        if dir.join(candidate).is_file() {
            return dir.join(candidate).to_string_lossy().into_owned();
        }
    }
    "python".to_string()
}

fn resolve_fastapi_app(service: &Service, dir: &Path) -> Result<String> {
    if let Some(entry) = &service.entrypoint {
        return Ok(entry.clone());
    }
    for candidate in ["main", "app", "src/main", "src/app"] {
        let file = format!("{}.py", candidate.rsplit('/').next().unwrap());
        let subpath = Path::new(candidate).parent();
        let path = match subpath {
            Some(p) if !p.as_os_str().is_empty() => dir.join(p).join(&file),
            _ => dir.join(&file),
        };
        if path.is_file() {
            let module = candidate.replace('/', ".");
            return Ok(format!("{}:app", module));
        }
    }
    Err(anyhow!("could not resolve a FastAPI entry module in {}", dir.display()))
}

fn build_command(
    service: &Service,
    project_dir: &Path,
    framework_kind: Option<Framework>,
    package_manager: Option<framework::PackageManager>,
    port: u16,
) -> Result<(String, Vec<String>, HashMap<String, String>)> {
    let mut env = HashMap::new();

    if let Some(raw_command) = &service.command {
        let mut parts = raw_command.split_whitespace();
        if let Some(entrypoint) = &service.entrypoint {
            let args: Vec<String> = parts.map(|s| s.to_string()).collect();
            return Ok((entrypoint.clone(), args, env));
        }
        let command = parts
            .next()
            .ok_or_else(|| anyhow!("empty command string"))?
            .to_string();
        let args: Vec<String> = parts.map(|s| s.to_string()).collect();
        return Ok((command, args, env));
    }

    let pm = package_manager.map(|p| p.as_str().to_string()).unwrap_or_else(|| "npm".to_string());

    let (command, args) = match framework_kind {
        Some(
            Framework::NextJs
            | Framework::React
            | Framework::Vue
            | Framework::Svelte
            | Framework::SvelteKit
            | Framework::Remix
            | Framework::Astro
            | Framework::Nuxt,
        ) => (pm, vec!["run".to_string(), "dev".to_string()]),
        Some(Framework::Angular) => ("ng".to_string(), vec!["serve".to_string(), "--port".to_string(), port.to_string()]),
        Some(Framework::NestJs) => (pm, vec!["run".to_string(), "start:dev".to_string()]),
        Some(Framework::NodeGeneric) => {
            let script = node_dev_or_start_script(project_dir);
            (pm, vec!["run".to_string(), script.to_string()])
        }
        Some(Framework::Django) => {
            if !file_exists(project_dir, "manage.py") {
                return Err(anyhow!("Django project missing manage.py in {}", project_dir.display()));
            }
            (
                venv_python(project_dir),
                vec!["manage.py".to_string(), "runserver".to_string(), format!("0.0.0.0:{}", port)],
            )
        }
        Some(Framework::FastApi) => {
            let app = resolve_fastapi_app(service, project_dir)?;
            (
                venv_python(project_dir),
                vec![
                    "-m".to_string(),
                    "uvicorn".to_string(),
                    app,
                    "--reload".to_string(),
                    "--host".to_string(),
                    "0.0.0.0".to_string(),
                    "--port".to_string(),
                    port.to_string(),
                ],
            )
        }
        Some(Framework::Flask) => {
            let app = service.entrypoint.clone().unwrap_or_else(|| "app".to_string());
            env.insert("FLASK_APP".to_string(), format!("{}.py", app));
            env.insert("FLASK_ENV".to_string(), "development".to_string());
            (
                venv_python(project_dir),
                vec![
                    "-m".to_string(),
                    "flask".to_string(),
                    "run".to_string(),
                    "--host".to_string(),
                    "0.0.0.0".to_string(),
                    "--port".to_string(),
                    port.to_string(),
                ],
            )
        }
        Some(Framework::Streamlit) => {
            let app = service.entrypoint.clone().unwrap_or_else(|| "app.py".to_string());
            (
                venv_python(project_dir),
                vec![
                    "-m".to_string(),
                    "streamlit".to_string(),
                    "run".to_string(),
                    app,
                    "--server.port".to_string(),
                    port.to_string(),
                ],
            )
        }
        Some(Framework::PythonGeneric) | Some(Framework::Gradio) => {
            let app = service.entrypoint.clone().unwrap_or_else(|| "app.py".to_string());
            (venv_python(project_dir), vec![app])
        }
        Some(Framework::DotNetApphost) => {
            let csproj = find_first_with_ext(project_dir, "csproj").ok_or_else(|| anyhow!("no .csproj found in {}", project_dir.display()))?;
            (
                "dotnet".to_string(),
                vec!["run".to_string(), "--project".to_string(), csproj, "--no-launch-profile".to_string()],
            )
        }
        Some(Framework::AspNetCore) | Some(Framework::DotNetGeneric) => {
            let csproj = find_first_with_ext(project_dir, "csproj").ok_or_else(|| anyhow!("no .csproj found in {}", project_dir.display()))?;
            ("dotnet".to_string(), vec!["run".to_string(), "--project".to_string(), csproj])
        }
        Some(Framework::SpringBootMaven) => ("mvn".to_string(), vec!["spring-boot:run".to_string()]),
        Some(Framework::SpringBootGradle) => ("gradle".to_string(), vec!["bootRun".to_string()]),
        Some(Framework::Go) => ("go".to_string(), vec!["run".to_string(), ".".to_string()]),
        Some(Framework::Rust) => ("cargo".to_string(), vec!["run".to_string()]),
        Some(Framework::Laravel) => (
            "php".to_string(),
            vec![
                "artisan".to_string(),
                "serve".to_string(),
                "--host=0.0.0.0".to_string(),
                format!("--port={}", port),
            ],
        ),
        Some(Framework::Php) => ("php".to_string(), vec!["-S".to_string(), format!("0.0.0.0:{}", port)]),
        None => return Err(anyhow!("no command could be synthesised for this service")),
    };

    Ok((command, args, env))
}

fn find_first_with_ext(dir: &Path, ext: &str) -> Option<String> {
    std::fs::read_dir(dir).ok()?.filter_map(|e| e.ok()).find_map(|e| {
        let path = e.path();
        if path.extension().and_then(|s| s.to_str()).map(|s| s.eq_ignore_ascii_case(ext)).unwrap_or(false) {
            Some(path.file_name()?.to_string_lossy().into_owned())
        } else {
            None
        }
    })
}

// --- Health profile ----------------------------------------------------

fn default_health_profile(framework_kind: Option<Framework>, port: u16) -> HealthCheckProfile {
    let mut profile = HealthCheckProfile {
        port,
        ..Default::default()
    };

    match framework_kind {
        Some(Framework::NextJs) => profile.log_match = Some("ready on".to_string()),
        Some(Framework::Django) => profile.log_match = Some("Starting development server".to_string()),
        Some(Framework::SpringBootMaven) | Some(Framework::SpringBootGradle) => {
            profile.path = "/actuator/health".to_string();
            profile.log_match = Some("Started".to_string());
        }
        Some(Framework::FastApi) => profile.path = "/docs".to_string(),
        Some(Framework::DotNetApphost) => profile.log_match = Some("Now listening on".to_string()),
        _ => {}
    }

    profile
}

fn apply_healthcheck_override(profile: &mut HealthCheckProfile, service: &Service, port: u16) {
    let spec = &service.healthcheck;
    if !spec.explicit {
        return;
    }
    if spec.disabled {
        profile.r#type = HealthCheckType::None;
        return;
    }
    if let Some(t) = &spec.r#type {
        profile.r#type = match t.to_lowercase().as_str() {
            "http" => HealthCheckType::Http,
            "tcp" => HealthCheckType::Tcp,
            "port" => HealthCheckType::Port,
            "process" => HealthCheckType::Process,
            "output" => HealthCheckType::Output,
            "none" => HealthCheckType::None,
            _ => profile.r#type,
        };
    }
    if let Some(path) = &spec.path {
        profile.path = path.clone();
    }
    if let Some(pattern) = &spec.pattern {
        profile.log_match = Some(pattern.clone());
    }
    if let Some(interval) = spec.interval {
        profile.interval = interval;
    }
    if let Some(timeout) = spec.timeout {
        profile.timeout = timeout;
    }
    if port != 0 {
        profile.port = port;
    }
}

// --- Mode detection -----------------------------------------------------

fn detect_mode(
    service: &Service,
    dir: &Path,
    framework_kind: Option<Framework>,
    _language: Language,
) -> Option<crate::manifest::ServiceMode> {
    use crate::manifest::ServiceMode;

    let command_text = service.command.clone().unwrap_or_default();
    let watch_keywords = [
        "--watch", "-w", "watch", "nodemon", "tsx watch", "ts-node-dev", "dotnet watch",
        "cargo watch", "air ", "reflex", "entr", "watchexec", "--reload", "livereload", "browser-sync",
    ];
    if watch_keywords.iter().any(|k| command_text.contains(k)) {
        return Some(ServiceMode::Watch);
    }

    let build_keywords = ["tsc", "go build", "mvn package", "gradle build", "cargo build"];
    if build_keywords.iter().any(|k| command_text.contains(k))
        && !watch_keywords.iter().any(|k| command_text.contains(k))
    {
        return Some(ServiceMode::Build);
    }

    for script in ["dev", "watch", "start:dev", "serve"] {
        if package_script_contains(dir, script, "nodemon")
            || package_script_contains(dir, script, "watch")
            || package_script_contains(dir, script, "--watch")
        {
            return Some(ServiceMode::Watch);
        }
    }

    if file_exists(dir, "air.toml") || file_exists(dir, ".air.toml") || file_exists(dir, "reflex.conf") {
        return Some(ServiceMode::Watch);
    }

    if let Ok(reqs) = std::fs::read_to_string(dir.join("requirements.txt")) {
        if ["watchdog", "watchfiles", "hupper", "reloading"]
            .iter()
            .any(|dep| reqs.contains(dep))
        {
            return Some(ServiceMode::Watch);
        }
    }

    match framework_kind {
        Some(Framework::FastApi) | Some(Framework::Flask) | Some(Framework::Django) | Some(Framework::NextJs) => {
            Some(ServiceMode::Watch)
        }
        _ => Some(ServiceMode::Daemon),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Service;
    use std::fs;
    use tempfile::tempdir;

    fn minimal_service(project: &str, ports: Vec<String>) -> Service {
        let yaml = if ports.is_empty() {
            format!("project: {}", project)
        } else {
            format!(
                "project: {}\nports:\n{}",
                project,
                ports.iter().map(|p| format!("  - \"{}\"", p)).collect::<Vec<_>>().join("\n")
            )
        };
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn fastapi_explicit_port_honoured() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("requirements.txt"), "fastapi").unwrap();
        fs::write(dir.path().join("main.py"), "from fastapi import FastAPI\napp = FastAPI()").unwrap();

        let service = minimal_service(".", vec!["8080".to_string()]);
        let allocator = PortAllocator::new("proj");
        let runtime = detect_runtime("api", &service, dir.path(), &allocator).unwrap();

        assert_eq!(runtime.port, 8080);
        assert!(runtime.command.ends_with("python") || runtime.command.contains("python"));
        assert_eq!(
            runtime.args,
            vec!["-m", "uvicorn", "main:app", "--reload", "--host", "0.0.0.0", "--port", "8080"]
        );
        assert!(!runtime.should_update_manifest);
    }

    #[test]
    fn no_ports_declared_downgrades_health_to_process() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("go.mod"), "module example").unwrap();
        let service = minimal_service(".", vec![]);
        let allocator = PortAllocator::new("proj");
        let runtime = detect_runtime("worker", &service, dir.path(), &allocator).unwrap();
        assert_eq!(runtime.port, 0);
        assert_eq!(runtime.health_check.r#type, HealthCheckType::Process);
    }

    #[test]
    fn unknown_language_fails_with_directory_in_message() {
        let dir = tempdir().unwrap();
        let service = minimal_service(".", vec![]);
        let allocator = PortAllocator::new("proj");
        let err = detect_runtime("mystery", &service, dir.path(), &allocator).unwrap_err();
        assert!(err.to_string().contains("could not detect language"));
    }

    #[test]
    fn detection_is_stable_modulo_port_assignment() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("go.mod"), "module example").unwrap();
        let service = minimal_service(".", vec!["8080".to_string()]);
        let allocator = PortAllocator::new("proj");
        let first = detect_runtime("svc", &service, dir.path(), &allocator).unwrap();
        let second = detect_runtime("svc", &service, dir.path(), &allocator).unwrap();
        assert_eq!(first.command, second.command);
        assert_eq!(first.args, second.args);
        assert_eq!(first.port, second.port);
    }
}
