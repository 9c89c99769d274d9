//! Default configuration values

/// Default git / task info host
pub const DEFAULT_HOST: &str = "git.altlinux.org";

/// Default source branch
pub const DEFAULT_IN_BRANCH: &str = "sisyphus";

/// Root of the locally mirrored branch repositories
pub const DEFAULT_REPO_BASE_PATH: &str = "/ALT";

/// Plant directory name under the home directory
pub const DEFAULT_PLANT_DIR_NAME: &str = "plant";

/// Host accepting `task` commands over ssh
pub const DEFAULT_CONTROL_HOST: &str = "gyle.altlinux.org";

/// Port of the task control ssh endpoint
pub const DEFAULT_CONTROL_PORT: u16 = 222;

/// Maximum build tool invocations per package while the log stays transient
pub const MAX_BUILD_ATTEMPTS: u32 = 5;

/// Base delay between transient build retries (in milliseconds)
pub const RETRY_BASE_DELAY_MS: u64 = 5_000;

/// Upper bound of the delay between transient build retries (in milliseconds)
pub const RETRY_MAX_DELAY_MS: u64 = 120_000;

/// Timeout for git, ssh and install calls (in seconds)
pub const COMMAND_TIMEOUT_SECS: u64 = 30 * 60;

/// Timeout for one build tool invocation (in seconds)
pub const BUILD_TIMEOUT_SECS: u64 = 4 * 60 * 60;

/// Timeout for task descriptor HTTP requests (in seconds)
pub const HTTP_TIMEOUT_SECS: u64 = 60;

/// Name of the local branch every checkout is built from
pub const BUILD_BRANCH: &str = "build";

/// Environment variable set for every external call
pub const REBUILD_ENV: (&str, &str) = ("REBUILD", "1");
