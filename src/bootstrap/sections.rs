//! Individual boot script sections, in emission order.

use std::borrow::Cow;

use shell_escape::unix::escape;
use tracing::warn;

use crate::environment::{Environment, is_variable_name};

/// Login user on the notebook image.
pub const NOTEBOOK_USER: &str = "ubuntu";
/// Directory served by the notebook server.
pub const WORKSPACE_DIR: &str = "/home/ubuntu/notebooks";
/// Log file capturing bootstrap output on the instance.
pub const BOOTSTRAP_LOG: &str = "/var/log/labship-bootstrap.log";
/// Notebook server configuration file.
pub const JUPYTER_CONFIG_PATH: &str = "/home/ubuntu/.jupyter/jupyter_server_config.py";
/// Systemd unit running the notebook server.
pub const JUPYTER_UNIT: &str = "jupyter.service";
/// Port the notebook server listens on.
pub const JUPYTER_PORT: u16 = 8888;

const PROFILE_PATH: &str = "/home/ubuntu/.bashrc";
const ENV_BLOCK_START: &str = "# >>> labship environment >>>";
const ENV_BLOCK_END: &str = "# <<< labship environment <<<";

/// A named, optional part of the boot script.
#[derive(Clone, Copy, Debug)]
pub struct Section {
    /// Stable identifier, also used as the comment header.
    pub name: &'static str,
    /// Renders the section, or `None` when it should be omitted.
    pub render: fn(&Environment) -> Option<String>,
}

/// Every section in emission order.
pub const SECTIONS: [Section; 12] = [
    Section {
        name: "preamble",
        render: preamble,
    },
    Section {
        name: "banner",
        render: banner,
    },
    Section {
        name: "system-update",
        render: system_update,
    },
    Section {
        name: "system-packages",
        render: system_packages,
    },
    Section {
        name: "pip-upgrade",
        render: pip_upgrade,
    },
    Section {
        name: "python-packages",
        render: python_packages,
    },
    Section {
        name: "extensions",
        render: extensions,
    },
    Section {
        name: "workspace",
        render: workspace,
    },
    Section {
        name: "environment-variables",
        render: environment_variables,
    },
    Section {
        name: "jupyter-config",
        render: jupyter_config,
    },
    Section {
        name: "jupyter-service",
        render: jupyter_service,
    },
    Section {
        name: "complete",
        render: complete,
    },
];

fn quote(value: &str) -> Cow<'_, str> {
    escape(Cow::Borrowed(value))
}

fn quote_all(values: &[String]) -> String {
    values
        .iter()
        .map(|value| quote(value).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn with_header(name: &str, lines: &[&str]) -> String {
    let mut out = format!("# --- {name} ---");
    for line in lines {
        out.push('\n');
        out.push_str(line);
    }
    out
}

fn preamble(_: &Environment) -> Option<String> {
    Some(format!(
        "#!/bin/bash\nset -euo pipefail\nexec > >(tee -a {BOOTSTRAP_LOG}) 2>&1"
    ))
}

fn banner(environment: &Environment) -> Option<String> {
    let message = format!("==> labship: bootstrapping environment {}", environment.name);
    Some(with_header(
        "banner",
        &[format!("echo {}", quote(&message)).as_str()],
    ))
}

fn system_update(_: &Environment) -> Option<String> {
    Some(with_header(
        "system-update",
        &[
            "export DEBIAN_FRONTEND=noninteractive",
            "apt-get update -y",
            "apt-get upgrade -y",
        ],
    ))
}

fn system_packages(environment: &Environment) -> Option<String> {
    if environment.system_packages.is_empty() {
        return None;
    }
    let install = format!(
        "apt-get install -y --no-install-recommends {}",
        quote_all(&environment.system_packages)
    );
    Some(with_header("system-packages", &[install.as_str()]))
}

fn pip_upgrade(_: &Environment) -> Option<String> {
    Some(with_header(
        "pip-upgrade",
        &[
            "export PIP_BREAK_SYSTEM_PACKAGES=1",
            "command -v pip3 >/dev/null 2>&1 || apt-get install -y python3-pip",
            "python3 -m pip install --upgrade pip",
        ],
    ))
}

fn python_packages(environment: &Environment) -> Option<String> {
    if environment.python_packages.is_empty() {
        return None;
    }
    let install = format!(
        "python3 -m pip install --upgrade {}",
        quote_all(&environment.python_packages)
    );
    Some(with_header("python-packages", &[install.as_str()]))
}

fn extensions(environment: &Environment) -> Option<String> {
    if environment.extensions.is_empty() {
        return None;
    }
    let header = format!("for extension in {}; do", quote_all(&environment.extensions));
    Some(with_header(
        "extensions",
        &[
            header.as_str(),
            "  jupyter labextension install \"$extension\"",
            "done",
            "jupyter lab build",
        ],
    ))
}

fn workspace(_: &Environment) -> Option<String> {
    Some(with_header(
        "workspace",
        &[
            format!("mkdir -p {WORKSPACE_DIR}").as_str(),
            format!("chown -R {NOTEBOOK_USER}:{NOTEBOOK_USER} {WORKSPACE_DIR}").as_str(),
        ],
    ))
}

fn environment_variables(environment: &Environment) -> Option<String> {
    // BTreeMap iteration keeps the block in key order. Entries that could
    // break out of the heredoc are dropped.
    let exports = environment
        .env
        .iter()
        .filter(|(key, value)| {
            let safe = is_variable_name(key) && !value.contains(['\n', '\r']);
            if !safe {
                warn!(variable = %key, "skipping environment variable unsafe for the boot script");
            }
            safe
        })
        .map(|(key, value)| format!("export {key}={}", quote(value)))
        .collect::<Vec<_>>();
    if exports.is_empty() {
        return None;
    }
    let mut lines = vec![
        format!("if ! grep -qF {} {PROFILE_PATH}; then", quote(ENV_BLOCK_START)),
        format!("cat >> {PROFILE_PATH} <<'LABSHIP_ENV'"),
        ENV_BLOCK_START.to_owned(),
    ];
    lines.extend(exports);
    lines.push(ENV_BLOCK_END.to_owned());
    lines.push(String::from("LABSHIP_ENV"));
    lines.push(String::from("fi"));
    let borrowed = lines.iter().map(String::as_str).collect::<Vec<_>>();
    Some(with_header("environment-variables", &borrowed))
}

// Authentication is left to the SSH tunnel; the server itself is open.
fn jupyter_config(_: &Environment) -> Option<String> {
    Some(with_header(
        "jupyter-config",
        &[
            format!("mkdir -p /home/{NOTEBOOK_USER}/.jupyter").as_str(),
            format!("cat > {JUPYTER_CONFIG_PATH} <<'LABSHIP_JUPYTER'").as_str(),
            "c.ServerApp.ip = '0.0.0.0'",
            format!("c.ServerApp.port = {JUPYTER_PORT}").as_str(),
            "c.ServerApp.open_browser = False",
            "c.ServerApp.token = ''",
            "c.ServerApp.password = ''",
            format!("c.ServerApp.root_dir = '{WORKSPACE_DIR}'").as_str(),
            "LABSHIP_JUPYTER",
            format!("chown -R {NOTEBOOK_USER}:{NOTEBOOK_USER} /home/{NOTEBOOK_USER}/.jupyter").as_str(),
        ],
    ))
}

fn jupyter_service(_: &Environment) -> Option<String> {
    Some(with_header(
        "jupyter-service",
        &[
            format!("cat > /etc/systemd/system/{JUPYTER_UNIT} <<'LABSHIP_UNIT'").as_str(),
            "[Unit]",
            "Description=Jupyter server (labship)",
            "After=network-online.target",
            "Wants=network-online.target",
            "",
            "[Service]",
            "Type=simple",
            format!("User={NOTEBOOK_USER}").as_str(),
            format!("WorkingDirectory={WORKSPACE_DIR}").as_str(),
            format!("ExecStart=/usr/local/bin/jupyter lab --config={JUPYTER_CONFIG_PATH}").as_str(),
            "Restart=on-failure",
            "RestartSec=5",
            "",
            "[Install]",
            "WantedBy=multi-user.target",
            "LABSHIP_UNIT",
            "systemctl daemon-reload",
            format!("systemctl enable --now {JUPYTER_UNIT}").as_str(),
        ],
    ))
}

fn complete(environment: &Environment) -> Option<String> {
    let message = format!("==> labship: environment {} ready", environment.name);
    Some(with_header(
        "complete",
        &[format!("echo {}", quote(&message)).as_str()],
    ))
}
