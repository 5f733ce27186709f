/// Language and framework detection, and the framework → command matrix.

use crate::manifest::probes::*;
use anyhow::{anyhow, Result};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    TypeScript,
    JavaScript,
    Python,
    DotNet,
    Java,
    Go,
    Rust,
    Php,
    Docker,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::DotNet => "dotnet",
            Language::Java => "java",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Php => "php",
            Language::Docker => "docker",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Language::TypeScript | Language::JavaScript => 3000,
            Language::Python => 8000,
            Language::DotNet => 5000,
            Language::Java => 8080,
            Language::Go => 8080,
            Language::Rust => 8000,
            Language::Php => 8000,
            Language::Docker => 0,
        }
    }
}

/// Detect the language of a project directory. An explicit override always
/// wins; otherwise marker files are checked in priority order.
pub fn detect_language(dir: &Path, explicit: Option<&str>, host: Option<&str>) -> Result<Language> {
    if let Some(lang) = explicit {
        return parse_language(lang).ok_or_else(|| anyhow!("unknown language override: {}", lang));
    }

    if file_exists(dir, "package.json") && file_exists(dir, "tsconfig.json") {
        return Ok(Language::TypeScript);
    }
    if file_exists(dir, "package.json") {
        return Ok(Language::JavaScript);
    }
    if file_exists(dir, "requirements.txt")
        || file_exists(dir, "pyproject.toml")
        || file_exists(dir, "Pipfile")
        || file_exists(dir, "setup.py")
    {
        return Ok(Language::Python);
    }
    if any_file_with_ext(dir, "csproj") || any_file_with_ext(dir, "sln") || any_file_with_ext(dir, "fsproj") {
        return Ok(Language::DotNet);
    }
    if file_exists(dir, "pom.xml") || file_exists(dir, "build.gradle") || file_exists(dir, "build.gradle.kts") {
        return Ok(Language::Java);
    }
    if file_exists(dir, "go.mod") {
        return Ok(Language::Go);
    }
    if file_exists(dir, "Cargo.toml") {
        return Ok(Language::Rust);
    }
    if file_exists(dir, "composer.json") {
        return Ok(Language::Php);
    }
    if file_exists(dir, "Dockerfile") || file_exists(dir, "docker-compose.yml") {
        return Ok(Language::Docker);
    }

    if matches!(host, Some("containerapp") | Some("aks")) {
        return Ok(Language::Docker);
    }

    Err(anyhow!("could not detect language in {}", dir.display()))
}

fn parse_language(s: &str) -> Option<Language> {
    match s.to_lowercase().as_str() {
        "typescript" | "ts" => Some(Language::TypeScript),
        "javascript" | "js" | "node" | "nodejs" => Some(Language::JavaScript),
        "python" | "py" => Some(Language::Python),
        "dotnet" | "csharp" | "c#" => Some(Language::DotNet),
        "java" => Some(Language::Java),
        "go" | "golang" => Some(Language::Go),
        "rust" => Some(Language::Rust),
        "php" => Some(Language::Php),
        "docker" => Some(Language::Docker),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
    Bun,
}

impl PackageManager {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Bun => "bun",
        }
    }
}

pub fn detect_package_manager(dir: &Path) -> PackageManager {
    if file_exists(dir, "pnpm-lock.yaml") {
        PackageManager::Pnpm
    } else if file_exists(dir, "yarn.lock") {
        PackageManager::Yarn
    } else if file_exists(dir, "bun.lockb") {
        PackageManager::Bun
    } else {
        PackageManager::Npm
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framework {
    NextJs,
    React,
    Vue,
    Svelte,
    SvelteKit,
    Remix,
    Astro,
    Nuxt,
    Angular,
    NestJs,
    NodeGeneric,
    Django,
    FastApi,
    Flask,
    Streamlit,
    Gradio,
    PythonGeneric,
    DotNetApphost,
    AspNetCore,
    DotNetGeneric,
    SpringBootMaven,
    SpringBootGradle,
    Go,
    Rust,
    Laravel,
    Php,
}

fn package_json_has_dep(dir: &Path, dep: &str) -> bool {
    let Ok(text) = std::fs::read_to_string(dir.join("package.json")) else {
        return false;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
        return false;
    };
    for section in ["dependencies", "devDependencies"] {
        if value
            .get(section)
            .and_then(|v| v.as_object())
            .map(|m| m.contains_key(dep))
            .unwrap_or(false)
        {
            return true;
        }
    }
    false
}

fn package_json_has_script_containing(dir: &Path, script: &str, needle: &str) -> bool {
    let Ok(text) = std::fs::read_to_string(dir.join("package.json")) else {
        return false;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
        return false;
    };
    value
        .get("scripts")
        .and_then(|s| s.get(script))
        .and_then(|s| s.as_str())
        .map(|s| s.contains(needle))
        .unwrap_or(false)
}

pub fn has_package_script(dir: &Path, script: &str) -> bool {
    let Ok(text) = std::fs::read_to_string(dir.join("package.json")) else {
        return false;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
        return false;
    };
    value
        .get("scripts")
        .and_then(|s| s.get(script))
        .is_some()
}

/// Refine a detected language into a named framework plus package manager.
pub fn detect_framework(
    dir: &Path,
    language: Language,
) -> Result<(Framework, Option<PackageManager>)> {
    match language {
        Language::TypeScript | Language::JavaScript => {
            let pm = detect_package_manager(dir);
            if file_exists(dir, "next.config.js") || file_exists(dir, "next.config.ts") || file_exists(dir, "next.config.mjs") {
                return Ok((Framework::NextJs, Some(pm)));
            }
            if file_exists(dir, "angular.json") {
                return Ok((Framework::Angular, Some(pm)));
            }
            if file_exists(dir, "svelte.config.js") {
                return Ok((Framework::SvelteKit, Some(pm)));
            }
            if file_exists(dir, "astro.config.mjs") || file_exists(dir, "astro.config.ts") {
                return Ok((Framework::Astro, Some(pm)));
            }
            if file_exists(dir, "nuxt.config.js") || file_exists(dir, "nuxt.config.ts") {
                return Ok((Framework::Nuxt, Some(pm)));
            }
            if file_exists(dir, "remix.config.js") {
                return Ok((Framework::Remix, Some(pm)));
            }
            if package_json_has_dep(dir, "@nestjs/core") {
                return Ok((Framework::NestJs, Some(pm)));
            }
            if package_json_has_dep(dir, "vue") {
                return Ok((Framework::Vue, Some(pm)));
            }
            if package_json_has_dep(dir, "svelte") {
                return Ok((Framework::Svelte, Some(pm)));
            }
            if package_json_has_dep(dir, "react") {
                return Ok((Framework::React, Some(pm)));
            }
            Ok((Framework::NodeGeneric, Some(pm)))
        }
        Language::Python => {
            if file_exists(dir, "manage.py") {
                return Ok((Framework::Django, None));
            }
            for entry in ["main.py", "app.py", "src/main.py", "src/app.py"] {
                if std::fs::read_to_string(dir.join(entry))
                    .map(|s| s.contains("FastAPI"))
                    .unwrap_or(false)
                {
                    return Ok((Framework::FastApi, None));
                }
            }
            for entry in ["main.py", "app.py", "src/main.py", "src/app.py"] {
                if std::fs::read_to_string(dir.join(entry))
                    .map(|s| s.contains("Flask"))
                    .unwrap_or(false)
                {
                    return Ok((Framework::Flask, None));
                }
            }
            for entry in ["main.py", "app.py", "streamlit_app.py"] {
                if std::fs::read_to_string(dir.join(entry))
                    .map(|s| s.contains("streamlit"))
                    .unwrap_or(false)
                {
                    return Ok((Framework::Streamlit, None));
                }
            }
            for entry in ["main.py", "app.py"] {
                if std::fs::read_to_string(dir.join(entry))
                    .map(|s| s.contains("gradio"))
                    .unwrap_or(false)
                {
                    return Ok((Framework::Gradio, None));
                }
            }
            Ok((Framework::PythonGeneric, None))
        }
        Language::DotNet => {
            if file_exists(dir, "AppHost.cs") {
                return Ok((Framework::DotNetApphost, None));
            }
            if any_file_with_ext_contains(dir, "csproj", "Microsoft.NET.Sdk.Web") {
                return Ok((Framework::AspNetCore, None));
            }
            Ok((Framework::DotNetGeneric, None))
        }
        Language::Java => {
            if file_exists(dir, "pom.xml") && file_contains(dir, "pom.xml", "spring-boot") {
                return Ok((Framework::SpringBootMaven, None));
            }
            if (file_exists(dir, "build.gradle") && file_contains(dir, "build.gradle", "org.springframework.boot"))
                || (file_exists(dir, "build.gradle.kts")
                    && file_contains(dir, "build.gradle.kts", "org.springframework.boot"))
            {
                return Ok((Framework::SpringBootGradle, None));
            }
            Err(anyhow!("unsupported framework: java (no spring-boot marker found)"))
        }
        Language::Go => Ok((Framework::Go, None)),
        Language::Rust => Ok((Framework::Rust, None)),
        Language::Php => {
            if file_exists(dir, "artisan") {
                return Ok((Framework::Laravel, None));
            }
            Ok((Framework::Php, None))
        }
        Language::Docker => Err(anyhow!("docker language has no application framework")),
    }
}

/// `npm run dev` if a `dev` script exists, else `npm run start` — used by
/// the generic Node.js framework and to disambiguate watch-mode detection.
pub fn node_dev_or_start_script(dir: &Path) -> &'static str {
    if has_package_script(dir, "dev") {
        "dev"
    } else {
        "start"
    }
}

pub fn package_script_contains(dir: &Path, script: &str, needle: &str) -> bool {
    package_json_has_script_containing(dir, script, needle)
}

// --- Azure Functions variant classification ---------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionVariant {
    LogicApps,
    Node,
    Python,
    DotNet,
    Java,
}

pub fn classify_function_variant(dir: &Path) -> Result<FunctionVariant> {
    if !file_exists(dir, "host.json") {
        return Err(anyhow!("host.json not found in {}", dir.display()));
    }

    if has_glob_match(dir, "workflows", "workflow.json") {
        return Ok(FunctionVariant::LogicApps);
    }
    if file_exists(dir, "function_app.py") {
        return Ok(FunctionVariant::Python);
    }
    if any_file_with_ext_contains(dir, "csproj", "Microsoft.NET.Sdk.Functions")
        || any_file_with_ext_contains(dir, "csproj", "Microsoft.Azure.Functions")
    {
        return Ok(FunctionVariant::DotNet);
    }
    if file_exists(dir, "pom.xml") && file_contains(dir, "pom.xml", "azure-functions-maven-plugin") {
        return Ok(FunctionVariant::Java);
    }
    if file_exists(dir, "package.json") {
        return Ok(FunctionVariant::Node);
    }

    Err(anyhow!("could not classify function variant in {}", dir.display()))
}

fn has_glob_match(dir: &Path, subdir: &str, filename: &str) -> bool {
    let base = dir.join(subdir);
    let Ok(entries) = std::fs::read_dir(&base) else {
        return false;
    };
    entries
        .filter_map(|e| e.ok())
        .any(|e| e.path().is_dir() && e.path().join(filename).is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn detects_typescript_over_javascript() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        fs::write(dir.path().join("tsconfig.json"), "{}").unwrap();
        assert_eq!(detect_language(dir.path(), None, None).unwrap(), Language::TypeScript);
    }

    #[test]
    fn detects_python_via_requirements() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("requirements.txt"), "fastapi").unwrap();
        assert_eq!(detect_language(dir.path(), None, None).unwrap(), Language::Python);
    }

    #[test]
    fn explicit_override_wins() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(
            detect_language(dir.path(), Some("rust"), None).unwrap(),
            Language::Rust
        );
    }

    #[test]
    fn fastapi_detected_from_main_py() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("requirements.txt"), "fastapi").unwrap();
        fs::write(dir.path().join("main.py"), "from fastapi import FastAPI\napp = FastAPI()").unwrap();
        let (fw, _) = detect_framework(dir.path(), Language::Python).unwrap();
        assert_eq!(fw, Framework::FastApi);
    }

    #[test]
    fn containerapp_host_falls_back_to_docker() {
        let dir = tempdir().unwrap();
        assert_eq!(
            detect_language(dir.path(), None, Some("containerapp")).unwrap(),
            Language::Docker
        );
    }
}
