use std::fs;
use std::path::Path;

const DOCKER_ENV_MARKER: &str = "/.dockerenv";
const INIT_CGROUP: &str = "/proc/1/cgroup";

/// Returns true when the current process runs inside a container.
///
/// Services use this to decide whether a local `.env` file is expected:
/// containers get their environment from the orchestrator.
pub fn is_running_in_docker() -> bool {
    detect_container(Path::new(DOCKER_ENV_MARKER), Path::new(INIT_CGROUP))
}

fn detect_container(marker: &Path, cgroup: &Path) -> bool {
    if marker.exists() {
        return true;
    }

    fs::read_to_string(cgroup)
        .map(|content| cgroup_mentions_container(&content))
        .unwrap_or(false)
}

fn cgroup_mentions_container(content: &str) -> bool {
    content.contains("docker") || content.contains("kubepods") || content.contains("containerd")
}
