//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests: a temporary
//! plant with branch listings, and a runner that answers external commands
//! from a script instead of spawning them.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use gear_rebuild::core::config::RebuildConfig;
use gear_rebuild::infra::process::{CommandOutput, CommandSpec, LogMode, ProcessError, ProcessRunner};

/// Branch every test builds in
pub const BRANCH: &str = "sisyphus";

/// Architecture of the fake hasher repository
pub const ARCH: &str = "x86_64";

/// Temporary plant, hasher root and branch mirror
pub struct TestPlant {
    pub dir: TempDir,
}

impl TestPlant {
    /// Create a plant whose branch lists the given packages
    pub fn new(listed: &[&str]) -> Self {
        let plant = Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        };
        std::fs::create_dir_all(plant.listing_dir()).expect("Failed to create listing");
        for name in listed {
            plant.list(name);
        }
        plant
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn plant_dir(&self) -> PathBuf {
        self.path().join("plant")
    }

    pub fn hasher_root(&self) -> PathBuf {
        self.path().join("hasher")
    }

    pub fn repo_base(&self) -> PathBuf {
        self.path().join("ALT")
    }

    pub fn listing_dir(&self) -> PathBuf {
        self.repo_base().join(BRANCH).join("files").join("SRPMS")
    }

    /// Add a package to the branch listing
    pub fn list(&self, name: &str) {
        std::fs::write(self.listing_dir().join(format!("{name}-1.0-alt1.src.rpm")), "")
            .expect("Failed to write listing entry");
    }

    /// Configuration rooted in this plant, with fast retries
    pub fn config(&self) -> RebuildConfig {
        let mut config = RebuildConfig::with_plant_dir(self.plant_dir());
        config.hasher_root = self.hasher_root();
        config.repo_base_path = self.repo_base();
        config.arch = ARCH.to_string();
        config.retry_base_delay = Duration::from_millis(1);
        config.command_timeout = Duration::from_secs(10);
        config.build_timeout = Duration::from_secs(10);
        config
    }

    /// Write a file relative to the temp dir
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }
}

/// Scripted result of one build tool invocation
#[derive(Debug, Clone)]
pub enum BuildScript {
    /// Exit 0 and produce a source and a binary package
    Success,
    /// Exit with the status and print the log
    Fail { status: i32, log: String },
}

impl BuildScript {
    pub fn fail(status: i32, log: &str) -> Self {
        Self::Fail {
            status,
            log: log.to_string(),
        }
    }
}

/// Runner answering every external command from a script
///
/// `git clone` initializes a real repository so the workspace facts can be
/// read back, `git checkout` creates the build branch, the build tool drops
/// packages into the hasher repository and reports them with relocation
/// lines.
pub struct FakeRunner {
    hasher_root: PathBuf,
    commands: Mutex<Vec<CommandSpec>>,
    builds: Mutex<HashMap<String, VecDeque<BuildScript>>>,
    missing: Mutex<HashSet<String>>,
    broken_checkouts: Mutex<HashSet<String>>,
    next_ordinal: Mutex<u32>,
    install_too_long: Mutex<bool>,
}

impl FakeRunner {
    pub fn new(plant: &TestPlant) -> Self {
        Self {
            hasher_root: plant.hasher_root(),
            commands: Mutex::new(Vec::new()),
            builds: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashSet::new()),
            broken_checkouts: Mutex::new(HashSet::new()),
            next_ordinal: Mutex::new(0o100),
            install_too_long: Mutex::new(false),
        }
    }

    /// Queue build results for a package; afterwards builds succeed
    pub fn script_builds(&self, name: &str, scripts: Vec<BuildScript>) {
        self.builds
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .extend(scripts);
    }

    /// Make every clone of the package report a missing repository
    pub fn missing_repository(&self, name: &str) {
        self.missing.lock().unwrap().insert(name.to_string());
    }

    /// Make every checkout of the package fail
    pub fn broken_checkout(&self, name: &str) {
        self.broken_checkouts.lock().unwrap().insert(name.to_string());
    }

    /// Make the first install call fail with E2BIG
    pub fn install_argument_list_too_long(&self) {
        *self.install_too_long.lock().unwrap() = true;
    }

    /// Command lines seen so far
    pub fn command_lines(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(CommandSpec::command_line)
            .collect()
    }

    /// Number of build tool invocations for a package
    pub fn builds_of(&self, name: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|spec| spec.program == "gear-hsh")
            .filter(|spec| spec.cwd.as_deref().and_then(Path::file_name) == Some(OsStr::new(name)))
            .count()
    }

    /// Command lines starting with a prefix
    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.command_lines()
            .into_iter()
            .filter(|line| line.starts_with(prefix))
            .collect()
    }

    fn git_clone(&self, spec: &CommandSpec) -> CommandOutput {
        let url = &spec.args[1];
        let name = &spec.args[2];
        if self.missing.lock().unwrap().contains(name) {
            return CommandOutput {
                status: Some(128),
                output: format!("Cloning into '{name}'...\nfatal: repository '{url}' not found\n"),
            };
        }

        let dest = spec.cwd.clone().unwrap_or_default().join(name);
        gix::init(&dest).expect("Failed to init repository");
        CommandOutput {
            status: Some(0),
            output: format!("Cloning into '{name}'...\n"),
        }
    }

    fn checkout(&self, spec: &CommandSpec) -> CommandOutput {
        let cwd = spec.cwd.clone().unwrap_or_default();
        let name = cwd
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.broken_checkouts.lock().unwrap().contains(&name) {
            return CommandOutput {
                status: Some(128),
                output: "fatal: 'build' is not a commit and a branch 'build' cannot be created from it\n"
                    .to_string(),
            };
        }

        let refs = cwd.join(".git/refs/heads");
        std::fs::create_dir_all(&refs).expect("Failed to create refs");
        std::fs::write(refs.join("build"), "0123456789abcdef0123456789abcdef01234567\n")
            .expect("Failed to write build branch");
        CommandOutput {
            status: Some(0),
            output: "Switched to a new branch 'build'\n".to_string(),
        }
    }

    fn build(&self, spec: &CommandSpec) -> CommandOutput {
        let name = spec
            .cwd
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let script = self
            .builds
            .lock()
            .unwrap()
            .get_mut(&name)
            .and_then(VecDeque::pop_front)
            .unwrap_or(BuildScript::Success);

        match script {
            BuildScript::Success => {
                let srpm = format!("repo/SRPMS.hasher/{name}-1.0-alt1.src.rpm");
                let rpm = format!("repo/{ARCH}/RPMS.hasher/{name}-1.0-alt1.noarch.rpm");
                let debug = format!("repo/{ARCH}/RPMS.hasher/{name}-debuginfo-1.0-alt1.x86_64.rpm");
                let mut output = String::from("Building target platforms: noarch\n");
                for relative in [&srpm, &rpm, &debug] {
                    let path = self.hasher_root.join(relative);
                    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                    std::fs::write(&path, "rpm").unwrap();
                    let file = Path::new(relative).file_name().unwrap().to_string_lossy();
                    output.push_str(&format!("mv: 'chroot/.out/{file}' -> '{relative}'\n"));
                }
                CommandOutput {
                    status: Some(0),
                    output,
                }
            }
            BuildScript::Fail { status, log } => CommandOutput {
                status: Some(status),
                output: log,
            },
        }
    }

    fn task(&self, spec: &CommandSpec) -> CommandOutput {
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        let Some(at) = args.iter().position(|arg| *arg == "task") else {
            return CommandOutput {
                status: Some(1),
                output: "no task command\n".to_string(),
            };
        };

        match &args[at + 1..] {
            ["add", _, "del", _] | ["delsub", _, _] => CommandOutput {
                status: Some(0),
                output: String::new(),
            },
            ["add", _, rest @ ..] => {
                let name = rest.last().copied().unwrap_or_default();
                let ordinal = if rest.len() == 3 {
                    u32::from_str_radix(rest[0], 8).unwrap()
                } else {
                    let mut next = self.next_ordinal.lock().unwrap();
                    *next += 1;
                    *next
                };
                CommandOutput {
                    status: Some(0),
                    output: format!("#100: added #{ordinal:o}: build tag \"{name}-1.0-alt1\"\n"),
                }
            }
            _ => CommandOutput {
                status: Some(1),
                output: "unknown task command\n".to_string(),
            },
        }
    }

    fn log(spec: &CommandSpec, output: &str) {
        let Some(target) = &spec.log else { return };
        if let Some(parent) = target.path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        match target.mode {
            LogMode::Truncate => std::fs::write(&target.path, output).unwrap(),
            LogMode::Append => {
                let mut previous = std::fs::read_to_string(&target.path).unwrap_or_default();
                previous.push_str(output);
                std::fs::write(&target.path, previous).unwrap();
            }
        }
    }
}

impl ProcessRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.commands.lock().unwrap().push(spec.clone());

        let output = match (spec.program.as_str(), spec.args.first().map(String::as_str)) {
            ("git", Some("clone")) => self.git_clone(spec),
            ("git", Some("checkout")) => self.checkout(spec),
            ("git", Some("describe")) => CommandOutput {
                status: Some(128),
                output: "fatal: No names found, cannot describe anything.\n".to_string(),
            },
            ("gear-hsh", _) => self.build(spec),
            ("ssh", _) => self.task(spec),
            ("hsh-install", _) => {
                let mut too_long = self.install_too_long.lock().unwrap();
                if *too_long {
                    *too_long = false;
                    return Err(ProcessError::ArgumentListTooLong {
                        program: spec.program.clone(),
                    });
                }
                CommandOutput {
                    status: Some(0),
                    output: String::new(),
                }
            }
            _ => CommandOutput {
                status: Some(0),
                output: String::new(),
            },
        };

        Self::log(spec, &output.output);
        Ok(output)
    }
}
