//! Argument vectors for the docker-compatible CLI. Kept pure so they can be
//! tested without a daemon.

use std::time::Duration;

use moor_core::{BuildSpec, HealthCheck, RuntimeError, WorkloadDescriptor};
use moor_runtime::{ListFilter, MANAGED_LABEL, SOURCE_LABEL};

pub const HEALTH_FORMAT: &str = "{{if .State.Health}}{{.State.Health.Status}}{{else}}none{{end}}";
pub const RUNNING_FORMAT: &str = "{{.State.Running}}";
pub const ID_FORMAT: &str = "{{.Id}}";

pub fn create_args(d: &WorkloadDescriptor, start: bool) -> Result<Vec<String>, RuntimeError> {
    let mut args: Vec<String> = if start {
        vec!["run".into(), "--detach".into()]
    } else {
        vec!["create".into()]
    };
    args.extend(["--name".into(), d.name.clone()]);
    args.extend(["--label".into(), format!("{MANAGED_LABEL}=true")]);
    if !d.source.is_empty() {
        args.extend(["--label".into(), format!("{SOURCE_LABEL}={}", d.source)]);
    }
    for p in &d.ports {
        args.extend(["--publish".into(), p.to_publish_arg()]);
    }
    for v in &d.volumes {
        args.extend(["--volume".into(), v.to_volume_arg()]);
    }
    for (k, v) in &d.env {
        args.extend(["--env".into(), format!("{k}={v}")]);
    }
    if let Some(net) = &d.network {
        args.extend(["--network".into(), net.clone()]);
    }
    if let Some(hc) = &d.health_check {
        args.extend(health_args(hc)?);
    }
    args.push(d.image_reference().to_string());
    args.extend(d.command.iter().cloned());
    Ok(args)
}

/// `--health-cmd` always goes through `/bin/sh -c`, so the exec form is
/// quoted word by word while `CMD-SHELL` passes through as written.
fn health_args(hc: &HealthCheck) -> Result<Vec<String>, RuntimeError> {
    let exec_form = match hc.test.split_first() {
        Some((first, _)) if first == "NONE" => return Ok(vec!["--no-healthcheck".to_string()]),
        Some((first, rest)) if first == "CMD-SHELL" => return Ok(with_health_timing(hc, rest.join(" "))),
        Some((first, rest)) if first == "CMD" => rest,
        _ => hc.test.as_slice(),
    };
    let cmd = shlex::try_join(exec_form.iter().map(String::as_str))
        .map_err(|e| RuntimeError::Definitive(format!("health check command {exec_form:?}: {e}")))?;
    Ok(with_health_timing(hc, cmd))
}

fn with_health_timing(hc: &HealthCheck, cmd: String) -> Vec<String> {
    let mut args = vec!["--health-cmd".to_string(), cmd];
    if let Some(d) = hc.interval {
        args.extend(["--health-interval".into(), duration_arg(d)]);
    }
    if let Some(d) = hc.timeout {
        args.extend(["--health-timeout".into(), duration_arg(d)]);
    }
    if let Some(r) = hc.retries {
        args.extend(["--health-retries".into(), r.to_string()]);
    }
    if let Some(d) = hc.start_period {
        args.extend(["--health-start-period".into(), duration_arg(d)]);
    }
    args
}

fn duration_arg(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

pub fn build_args(spec: &BuildSpec) -> Vec<String> {
    let mut args = vec!["build".to_string(), "--tag".to_string(), spec.tag.clone()];
    if let Some(f) = &spec.dockerfile {
        args.extend(["--file".into(), f.clone()]);
    }
    args.push(spec.context.clone());
    args
}

pub fn inspect_args(name: &str, format: &str) -> Vec<String> {
    vec!["container".into(), "inspect".into(), "--format".into(), format.into(), name.into()]
}

pub fn stop_args(name: &str, timeout: Duration) -> Vec<String> {
    vec!["stop".into(), "--time".into(), timeout.as_secs().to_string(), name.into()]
}

pub fn remove_args(name: &str, force: bool) -> Vec<String> {
    let mut args = vec!["rm".to_string()];
    if force {
        args.push("--force".into());
    }
    args.push(name.into());
    args
}

pub fn list_args(filter: &ListFilter) -> Vec<String> {
    let mut args: Vec<String> = vec!["ps".into(), "--all".into(), "--format".into(), "{{.Names}}".into()];
    match filter {
        ListFilter::All => {}
        ListFilter::Label { key, value } => args.extend(["--filter".into(), format!("label={key}={value}")]),
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use moor_core::{PortMapping, VolumeMount};

    fn web() -> WorkloadDescriptor {
        let mut d = WorkloadDescriptor::for_image("web", "nginx:1.25");
        d.source = "/srv/web.yaml".into();
        d.ports.push(PortMapping::parse("8080:80").unwrap());
        d.volumes.push(VolumeMount::parse("./html:/usr/share/nginx/html:ro").unwrap());
        d.env.insert("MODE".into(), "prod".into());
        d.network = Some("backend".into());
        d
    }

    #[test]
    fn create_without_start_uses_create() {
        let args = create_args(&web(), false).unwrap();
        assert_eq!(args[0], "create");
        assert_eq!(
            args,
            vec![
                "create", "--name", "web", "--label", "moor.managed=true", "--label", "moor.source=/srv/web.yaml",
                "--publish", "8080:80/tcp", "--volume", "./html:/usr/share/nginx/html:ro", "--env", "MODE=prod",
                "--network", "backend", "nginx:1.25",
            ]
        );
    }

    #[test]
    fn create_with_start_runs_detached_and_appends_command() {
        let mut d = web();
        d.command = vec!["nginx".into(), "-g".into(), "daemon off;".into()];
        let args = create_args(&d, true).unwrap();
        assert_eq!(&args[..2], &["run", "--detach"]);
        assert_eq!(&args[args.len() - 4..], &["nginx:1.25", "nginx", "-g", "daemon off;"]);
    }

    fn check(test: &[&str]) -> HealthCheck {
        HealthCheck { test: test.iter().map(|t| t.to_string()).collect(), interval: None, timeout: None, retries: None, start_period: None }
    }

    fn health_cmd(args: &[String]) -> &str {
        let i = args.iter().position(|a| a == "--health-cmd").unwrap();
        &args[i + 1]
    }

    #[test]
    fn health_check_flags() {
        let mut d = web();
        d.health_check = Some(HealthCheck {
            interval: Some(Duration::from_secs(5)),
            timeout: Some(Duration::from_millis(1500)),
            retries: Some(3),
            ..check(&["CMD", "curl", "-f", "http://localhost/"])
        });
        let args = create_args(&d, false).unwrap();
        assert_eq!(health_cmd(&args), "curl -f http://localhost/");
        let joined = args.join(" ");
        assert!(joined.contains("--health-interval 5s"));
        assert!(joined.contains("--health-timeout 1500ms"));
        assert!(joined.contains("--health-retries 3"));
    }

    #[test]
    fn exec_form_health_check_keeps_argument_boundaries() {
        let mut d = web();
        d.health_check = Some(check(&["CMD", "sh", "-c", "pg_isready -U postgres"]));
        let args = create_args(&d, false).unwrap();
        let cmd = health_cmd(&args);
        assert_eq!(shlex::split(cmd).unwrap(), vec!["sh", "-c", "pg_isready -U postgres"]);
        assert_ne!(cmd, "sh -c pg_isready -U postgres");
    }

    #[test]
    fn shell_form_passes_through_and_none_disables() {
        let mut d = web();
        d.health_check = Some(check(&["CMD-SHELL", "pg_isready -U postgres || exit 1"]));
        assert_eq!(health_cmd(&create_args(&d, false).unwrap()), "pg_isready -U postgres || exit 1");

        d.health_check = Some(check(&["NONE"]));
        let args = create_args(&d, false).unwrap();
        assert!(args.contains(&"--no-healthcheck".to_string()));
        assert!(!args.contains(&"--health-cmd".to_string()));
    }

    #[test]
    fn list_filters() {
        assert_eq!(list_args(&ListFilter::managed()).last().unwrap(), "label=moor.managed=true");
        assert_eq!(list_args(&ListFilter::All).len(), 4);
    }

    #[test]
    fn build_args_include_dockerfile() {
        let spec = BuildSpec { context: "./api".into(), dockerfile: Some("Dockerfile.dev".into()), tag: "api:dev".into() };
        assert_eq!(build_args(&spec), vec!["build", "--tag", "api:dev", "--file", "Dockerfile.dev", "./api"]);
    }
}
