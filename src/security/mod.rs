pub mod audit;
pub mod policy;
pub mod rate_limiter;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Result, AgentError};

// ===========================================================================
// SandboxedFs — path-jailed filesystem access
// ===========================================================================

/// Sandboxed filesystem — all file I/O is confined to the data directory.
#[derive(Debug, Clone)]
pub struct SandboxedFs {
    root: PathBuf,
}

impl SandboxedFs {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        let root = root
            .canonicalize()
            .map_err(|e| AgentError::SandboxViolation(format!("cannot canonicalize root: {e}")))?;
        Ok(Self { root })
    }

    /// Resolve a relative path within the sandbox. Rejects any path that escapes.
    pub fn resolve(&self, relative: &Path) -> Result<PathBuf> {
        if relative.is_absolute() {
            return Err(AgentError::SandboxViolation(
                "absolute paths are not allowed".into(),
            ));
        }

        let candidate = self.root.join(relative);

        // Create parent dirs so canonicalize works on new files
        if let Some(parent) = candidate.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // For existing paths, canonicalize and check containment
        if candidate.exists() {
            let canonical = candidate.canonicalize()?;
            if !canonical.starts_with(&self.root) {
                return Err(AgentError::SandboxViolation(format!(
                    "path escapes sandbox: {}",
                    relative.display()
                )));
            }
            return Ok(canonical);
        }

        // For new paths, canonicalize the parent and check
        if let Some(parent) = candidate.parent() {
            let canonical_parent = parent.canonicalize()?;
            if !canonical_parent.starts_with(&self.root) {
                return Err(AgentError::SandboxViolation(format!(
                    "path escapes sandbox: {}",
                    relative.display()
                )));
            }
            let filename = candidate
                .file_name()
                .ok_or_else(|| AgentError::SandboxViolation("invalid filename".into()))?;
            return Ok(canonical_parent.join(filename));
        }

        Err(AgentError::SandboxViolation(
            "cannot resolve path".into(),
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn read(&self, relative: &Path) -> Result<Vec<u8>> {
        let path = self.resolve(relative)?;
        Ok(std::fs::read(path)?)
    }

    pub fn write(&self, relative: &Path, data: &[u8]) -> Result<()> {
        let path = self.resolve(relative)?;
        Ok(std::fs::write(path, data)?)
    }

    pub fn read_to_string(&self, relative: &Path) -> Result<String> {
        let path = self.resolve(relative)?;
        Ok(std::fs::read_to_string(path)?)
    }

    pub fn exists(&self, relative: &Path) -> bool {
        self.resolve(relative).map(|p| p.exists()).unwrap_or(false)
    }
}

// ===========================================================================
// Process resource limits (Unix only)
// ===========================================================================

/// Resource limits to apply to child processes via pre_exec.
#[derive(Debug, Clone)]
pub struct ProcessLimits {
    /// Max virtual memory in bytes (RLIMIT_AS). Default: 2 GiB.
    pub max_memory_bytes: u64,
    /// Max file size in bytes (RLIMIT_FSIZE). Default: 256 MiB.
    pub max_file_size_bytes: u64,
    /// Max open file descriptors (RLIMIT_NOFILE). Default: 256.
    pub max_open_files: u64,
    /// Max CPU time in seconds (RLIMIT_CPU). Default: 300 (5 min).
    pub max_cpu_secs: u64,
    /// Max number of processes/threads (RLIMIT_NPROC). Default: 64.
    pub max_processes: u64,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 2 * 1024 * 1024 * 1024,   // 2 GiB
            max_file_size_bytes: 256 * 1024 * 1024,      // 256 MiB
            max_open_files: 256,
            max_cpu_secs: 300,
            max_processes: 64,
        }
    }
}

/// More permissive limits for LLM backends and trusted subprocesses.
impl ProcessLimits {
    pub fn permissive() -> Self {
        Self {
            max_memory_bytes: 8 * 1024 * 1024 * 1024,   // 8 GiB
            max_file_size_bytes: 1024 * 1024 * 1024,     // 1 GiB
            max_open_files: 1024,
            max_cpu_secs: 3600,
            max_processes: 256,
        }
    }

    /// Restrictive limits for skill processes.
    pub fn skill() -> Self {
        Self {
            max_memory_bytes: 1024 * 1024 * 1024,        // 1 GiB
            max_file_size_bytes: 128 * 1024 * 1024,       // 128 MiB
            max_open_files: 128,
            max_cpu_secs: 600,
            max_processes: 32,
        }
    }
}

/// Apply resource limits as a pre_exec hook on Unix systems.
/// This function is async-signal-safe and suitable for use in `pre_exec`.
#[cfg(unix)]
pub unsafe fn apply_process_limits(limits: &ProcessLimits) -> std::io::Result<()> {
    use rlimit::Resource;

    let set = |resource: Resource, limit: u64| -> std::io::Result<()> {
        resource.set(limit, limit).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Other, format!("setrlimit failed: {e}"))
        })
    };

    set(Resource::AS, limits.max_memory_bytes)?;
    set(Resource::FSIZE, limits.max_file_size_bytes)?;
    set(Resource::NOFILE, limits.max_open_files)?;
    set(Resource::CPU, limits.max_cpu_secs)?;
    set(Resource::NPROC, limits.max_processes)?;

    Ok(())
}

// ===========================================================================
// Landlock filesystem sandbox (Linux only)
// ===========================================================================

/// Apply Landlock filesystem restrictions to the current process.
/// This restricts filesystem access at the kernel level, providing defense-in-depth
/// even if application-level sandboxing has bugs.
///
/// The policy:
/// - Read-write: data_dir, config_dir, tmp
/// - Read-only: system paths (/usr, /lib, /etc, nvm, pyenv, skill dirs)
/// - Execute: system binaries, nvm/pyenv managed binaries
/// - Everything else: denied
#[cfg(target_os = "linux")]
pub fn apply_landlock(data_dir: &Path, config_dir: &Path) -> std::result::Result<(), String> {
    use landlock::{
        Access, AccessFs, BitFlags, PathBeneath, PathFd, Ruleset, RulesetAttr,
        RulesetCreatedAttr, RulesetStatus, ABI,
    };

    let abi = ABI::V3;

    let read_only: BitFlags<AccessFs> = AccessFs::from_read(abi);
    let read_write: BitFlags<AccessFs> = AccessFs::from_all(abi);

    let status = Ruleset::default()
        .handle_access(read_write)
        .map_err(|e| format!("landlock ruleset: {e}"))?
        .create()
        .map_err(|e| format!("landlock create: {e}"))?
        // Read-write access to data directory
        .add_rule(PathBeneath::new(
            PathFd::new(data_dir).map_err(|e| format!("landlock pathfd data: {e}"))?,
            read_write,
        ))
        .map_err(|e| format!("landlock rule data_dir: {e}"))?
        // Read-write access to config directory
        .add_rule(PathBeneath::new(
            PathFd::new(config_dir).map_err(|e| format!("landlock pathfd config: {e}"))?,
            read_write,
        ))
        .map_err(|e| format!("landlock rule config_dir: {e}"))?
        // Read-write access to /tmp
        .add_rule(PathBeneath::new(
            PathFd::new("/tmp").map_err(|e| format!("landlock pathfd tmp: {e}"))?,
            read_write,
        ))
        .map_err(|e| format!("landlock rule /tmp: {e}"))?;

    // Read-only + execute for system paths containing binaries.
    let exec_paths = ["/usr", "/bin", "/sbin", "/lib", "/lib64"];
    let mut status = status;
    for p in &exec_paths {
        if Path::new(p).exists() {
            status = status
                .add_rule(PathBeneath::new(
                    PathFd::new(p).map_err(|e| format!("landlock pathfd {p}: {e}"))?,
                    read_only | AccessFs::Execute,
                ))
                .map_err(|e| format!("landlock rule {p}: {e}"))?;
        }
    }

    // Read-only system paths (no execute needed).
    let ro_paths = [
        "/etc", "/proc/self", "/dev/null", "/dev/zero", "/dev/urandom",
    ];
    for p in &ro_paths {
        if Path::new(p).exists() {
            status = status
                .add_rule(PathBeneath::new(
                    PathFd::new(p).map_err(|e| format!("landlock pathfd {p}: {e}"))?,
                    read_only,
                ))
                .map_err(|e| format!("landlock rule {p}: {e}"))?;
        }
    }

    // nvm / pyenv directories (read-only + execute)
    let nvm_dir = std::env::var("NVM_DIR").unwrap_or_default();
    let pyenv_root = std::env::var("PYENV_ROOT").unwrap_or_default();
    for dir in [&nvm_dir, &pyenv_root] {
        if !dir.is_empty() && Path::new(dir).exists() {
            status = status
                .add_rule(PathBeneath::new(
                    PathFd::new(dir.as_str()).map_err(|e| format!("landlock pathfd {dir}: {e}"))?,
                    read_only | AccessFs::Execute,
                ))
                .map_err(|e| format!("landlock rule {dir}: {e}"))?;
        }
    }

    // Home directory for config files (read-only outside data/config)
    if let Some(home) = dirs::home_dir() {
        if home.exists() {
            status = status
                .add_rule(PathBeneath::new(
                    PathFd::new(&home).map_err(|e| format!("landlock pathfd home: {e}"))?,
                    read_only,
                ))
                .map_err(|e| format!("landlock rule home: {e}"))?;
        }
    }

    let result = status
        .restrict_self()
        .map_err(|e| format!("landlock restrict_self: {e}"))?;

    match result.ruleset {
        RulesetStatus::FullyEnforced => {
            info!("landlock sandbox fully enforced");
            Ok(())
        }
        RulesetStatus::PartiallyEnforced => {
            warn!("landlock sandbox partially enforced (kernel may not support all features)");
            Ok(())
        }
        RulesetStatus::NotEnforced => {
            warn!("landlock not enforced (kernel too old or Landlock disabled)");
            Ok(())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn apply_landlock(_data_dir: &Path, _config_dir: &Path) -> std::result::Result<(), String> {
    info!("landlock not available on this platform (Linux only)");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // SandboxedFs
    // -------------------------------------------------------------------------

    #[test]
    fn test_sandboxed_fs_new_and_root() {
        let tmp = std::env::temp_dir().join("test_sandboxed_fs");
        std::fs::create_dir_all(&tmp).unwrap();

        let sandbox = SandboxedFs::new(tmp.clone()).unwrap();
        let root = sandbox.root();
        assert!(root.ends_with("test_sandboxed_fs") || root.canonicalize().unwrap().ends_with("test_sandboxed_fs"));

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn test_sandboxed_fs_resolve_valid_paths() {
        let tmp = std::env::temp_dir().join("test_sandbox_resolve");
        std::fs::create_dir_all(&tmp).unwrap();

        let sandbox = SandboxedFs::new(tmp.clone()).unwrap();

        // Valid relative paths
        let p1 = sandbox.resolve(std::path::Path::new("file.txt")).unwrap();
        assert!(p1.ends_with("file.txt"));

        let subdir = tmp.join("subdir");
        std::fs::create_dir_all(&subdir).unwrap();
        let p2 = sandbox.resolve(std::path::Path::new("subdir/file.txt")).unwrap();
        let p2_str = p2.to_string_lossy();
        assert!(p2_str.contains("subdir") && p2_str.contains("file.txt"));

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn test_sandboxed_fs_resolve_rejects_traversal() {
        let tmp = std::env::temp_dir().join("test_sandbox_traversal");
        std::fs::create_dir_all(&tmp).unwrap();

        let sandbox = SandboxedFs::new(tmp.clone()).unwrap();

        assert!(sandbox.resolve(std::path::Path::new("../etc/passwd")).is_err());
        assert!(sandbox.resolve(std::path::Path::new("subdir/../../etc/passwd")).is_err());
        assert!(sandbox.resolve(std::path::Path::new("..")).is_err());
        assert!(sandbox.resolve(std::path::Path::new("a/../..")).is_err());

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn test_sandboxed_fs_resolve_rejects_absolute_paths() {
        let tmp = std::env::temp_dir().join("test_sandbox_absolute");
        std::fs::create_dir_all(&tmp).unwrap();

        let sandbox = SandboxedFs::new(tmp.clone()).unwrap();

        let abs = std::path::Path::new("/etc/passwd");
        assert!(abs.is_absolute());
        assert!(sandbox.resolve(abs).is_err());

        std::fs::remove_dir_all(&tmp).ok();
    }

    // -------------------------------------------------------------------------
    // ProcessLimits
    // -------------------------------------------------------------------------

    #[test]
    fn test_process_limits_default() {
        let limits = ProcessLimits::default();
        assert_eq!(limits.max_memory_bytes, 2 * 1024 * 1024 * 1024);   // 2 GiB
        assert_eq!(limits.max_file_size_bytes, 256 * 1024 * 1024);    // 256 MiB
        assert_eq!(limits.max_open_files, 256);
        assert_eq!(limits.max_cpu_secs, 300);
        assert_eq!(limits.max_processes, 64);
    }

    #[test]
    fn test_process_limits_permissive() {
        let limits = ProcessLimits::permissive();
        assert_eq!(limits.max_memory_bytes, 8 * 1024 * 1024 * 1024);   // 8 GiB
        assert_eq!(limits.max_file_size_bytes, 1024 * 1024 * 1024);    // 1 GiB
        assert_eq!(limits.max_open_files, 1024);
        assert_eq!(limits.max_cpu_secs, 3600);
        assert_eq!(limits.max_processes, 256);
    }

    #[test]
    fn test_process_limits_skill() {
        let limits = ProcessLimits::skill();
        assert_eq!(limits.max_memory_bytes, 1024 * 1024 * 1024);       // 1 GiB
        assert_eq!(limits.max_file_size_bytes, 128 * 1024 * 1024);     // 128 MiB
        assert_eq!(limits.max_open_files, 128);
        assert_eq!(limits.max_cpu_secs, 600);
        assert_eq!(limits.max_processes, 32);
    }

}
