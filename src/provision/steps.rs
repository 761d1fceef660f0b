//! The fixed command sequence run inside a new container.

use shell_escape::unix::escape;

/// One command in the provisioning sequence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisioningStep {
    /// Operator-facing name, used in logs and failure reports.
    pub description: String,
    /// Shell command run inside the container.
    pub command: String,
    /// Whether a failure aborts the run.
    pub fatal: bool,
}

impl ProvisioningStep {
    fn fatal(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            command: command.into(),
            fatal: true,
        }
    }

    fn tolerated(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            command: command.into(),
            fatal: false,
        }
    }
}

const APT_GET: &str = "DEBIAN_FRONTEND=noninteractive apt-get";

/// Appends each key to root's `authorized_keys` unless an identical line is
/// already present.
pub(crate) fn authorized_key_steps(keys: &[String]) -> Vec<ProvisioningStep> {
    keys.iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .enumerate()
        .map(|(index, key)| {
            let quoted = escape(key.into());
            ProvisioningStep::fatal(
                format!("Install SSH key {}", index.saturating_add(1)),
                format!(
                    "mkdir -p ~/.ssh && chmod 700 ~/.ssh && touch ~/.ssh/authorized_keys && \
                     chmod 600 ~/.ssh/authorized_keys && \
                     (grep -qxF {quoted} ~/.ssh/authorized_keys || echo {quoted} >> ~/.ssh/authorized_keys)"
                ),
            )
        })
        .collect()
}

pub(crate) fn package_index_step() -> ProvisioningStep {
    ProvisioningStep::tolerated("Update package index", format!("{APT_GET} update"))
}

pub(crate) fn package_install_step(packages: &[String]) -> Option<ProvisioningStep> {
    let names: Vec<&str> = packages
        .iter()
        .map(|package| package.trim())
        .filter(|package| !package.is_empty())
        .collect();
    if names.is_empty() {
        return None;
    }
    let quoted: Vec<String> = names
        .iter()
        .map(|name| escape((*name).into()).into_owned())
        .collect();
    Some(ProvisioningStep::fatal(
        format!("Install packages: {}", names.join(", ")),
        format!("{APT_GET} install -y {}", quoted.join(" ")),
    ))
}

/// Docker CE from the upstream apt repository. Each sub-step is fatal.
pub(crate) fn docker_steps() -> Vec<ProvisioningStep> {
    vec![
        ProvisioningStep::fatal(
            "Docker: install prerequisites",
            format!("{APT_GET} install -y ca-certificates curl"),
        ),
        ProvisioningStep::fatal(
            "Docker: create keyrings directory",
            "install -m 0755 -d /etc/apt/keyrings",
        ),
        ProvisioningStep::fatal(
            "Docker: add signing key",
            ". /etc/os-release && curl -fsSL \"https://download.docker.com/linux/${ID}/gpg\" \
             -o /etc/apt/keyrings/docker.asc && chmod a+r /etc/apt/keyrings/docker.asc",
        ),
        ProvisioningStep::fatal(
            "Docker: add repository",
            ". /etc/os-release && echo \"deb [arch=$(dpkg --print-architecture) \
             signed-by=/etc/apt/keyrings/docker.asc] https://download.docker.com/linux/${ID} \
             ${VERSION_CODENAME} stable\" > /etc/apt/sources.list.d/docker.list",
        ),
        ProvisioningStep::fatal(
            "Docker: update package index",
            format!("{APT_GET} update"),
        ),
        ProvisioningStep::fatal(
            "Docker: install packages",
            format!(
                "{APT_GET} install -y docker-ce docker-ce-cli containerd.io \
                 docker-buildx-plugin docker-compose-plugin"
            ),
        ),
    ]
}

/// Installs the Tailscale client and joins the network with `auth_key`.
pub(crate) fn mesh_steps(auth_key: &str) -> Vec<ProvisioningStep> {
    let argument = format!("--auth-key={auth_key}");
    vec![
        ProvisioningStep::fatal(
            "Tailscale: install client",
            "curl -fsSL https://tailscale.com/install.sh | sh",
        ),
        ProvisioningStep::fatal(
            "Tailscale: join network",
            format!("tailscale up {}", escape(argument.as_str().into())),
        ),
    ]
}
