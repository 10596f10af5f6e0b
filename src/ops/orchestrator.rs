//! The orchestration engine: configure, build, test, testall.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::core::{modules, toolchain, BuildConfig, Project, DESCRIPTOR_NAME};
use crate::errors::BuildError;
use crate::exec::{
    ChildHandle, JobBroker, LogSink, OutputMultiplexer, ProcessBuilder, Severity, TracingSink,
};
use crate::ops::executor::Executor;
use crate::util::fs::{ensure_dir, normalize_path, remove_dir_all_if_exists, update_symlink};
use crate::util::version::read_zephyr_version;

/// Generator/configure chatter that is informational rather than alarming.
const CHATTER_PREFIXES: &[&str] = &[
    "-- ",
    "Loaded configuration",
    "Including boilerplate",
    "Parsing ",
    "No change to configuration",
    "No change to Kconfig header",
];

/// First words of the build tool's memory-usage report, which arrives on
/// stdout and must keep its configured level.
const MEMORY_REPORT_WORDS: &[&str] = &["Memory", "FLASH:", "SRAM:", "IDT_LIST:"];

/// Classify one line of ninja stdout.
///
/// Progress counters and tool banter are demoted; anything unrecognized
/// on stdout is almost always a compiler diagnostic leaking through and
/// gets promoted, except the memory-usage report.
pub fn ninja_severity(line: &str, default: Severity) -> Severity {
    if line.starts_with('[')
        || line.starts_with("ninja: Entering directory")
        || line.starts_with("ninja: build stopped")
        || line.starts_with("***")
        || line.starts_with("ccache")
    {
        return Severity::Debug;
    }
    if line.starts_with("FAILED: CMakeFiles") {
        // The interesting diagnostic follows on later lines.
        return Severity::Info;
    }
    if CHATTER_PREFIXES.iter().any(|p| line.starts_with(p)) {
        return Severity::Info;
    }
    let first = line.split_whitespace().next().unwrap_or("");
    if MEMORY_REPORT_WORDS.contains(&first) {
        return default;
    }
    default.max(Severity::Error)
}

/// Classify one line of configuration-generator output.
pub fn cmake_severity(line: &str, default: Severity) -> Severity {
    if line.starts_with("Including boilerplate") {
        return Severity::Debug;
    }
    if CHATTER_PREFIXES.iter().any(|p| line.starts_with(p)) {
        return Severity::Info;
    }
    default
}

/// Settings shared by every operation of one orchestrator.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    /// Parallelism for a standalone job broker; ignored when an external
    /// jobserver is joined.
    pub jobs: Option<usize>,
    /// Directory holding the known modules as subdirectories.
    pub modules_dir: Option<PathBuf>,
    /// Zephyr source tree; falls back to the `ZEPHYR_BASE` environment
    /// variable.
    pub zephyr_base: Option<PathBuf>,
    /// Configuration generator executable; located on `PATH` when unset.
    pub cmake: Option<PathBuf>,
    /// Build tool executable; located on `PATH` when unset.
    pub ninja: Option<PathBuf>,
}

/// Options for [`Orchestrator::configure`].
#[derive(Debug, Clone, Default)]
pub struct ConfigureOptions {
    /// Override the descriptor's toolchain.
    pub toolchain: Option<String>,
    /// Enable bringup diagnostics in the firmware.
    pub bringup: bool,
    /// Enable coverage instrumentation.
    pub coverage: bool,
    /// Skip the Zephyr version compatibility gate.
    pub allow_unsupported: bool,
    /// Chain straight into `build` once configured.
    pub build_after_configure: bool,
    /// Chain straight into `test` once configured (implies a build).
    pub test_after_configure: bool,
}

/// Options for [`Orchestrator::build`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Build variants one after another instead of concurrently.
    pub sequential: bool,
    /// Fail the build when any captured line reached warning level.
    pub fail_on_warnings: bool,
}

/// Drives external build tools for whole projects.
///
/// Owns the job broker bounding subprocess parallelism and the output
/// multiplexer forwarding captured tool output, so every operation on one
/// orchestrator shares a single job budget and log stream.
pub struct Orchestrator {
    broker: JobBroker,
    mux: OutputMultiplexer,
    sink: Arc<dyn LogSink>,
    module_paths: BTreeMap<String, PathBuf>,
    zephyr_base: Option<PathBuf>,
    cmake: PathBuf,
    ninja: PathBuf,
}

impl Orchestrator {
    pub fn new(opts: &OrchestratorOptions) -> Result<Self, BuildError> {
        let broker = match JobBroker::from_environ() {
            Ok(broker) => {
                debug!("joined the jobserver advertised through MAKEFLAGS");
                broker
            }
            Err(_) => JobBroker::standalone(opts.jobs)?,
        };

        let cmake = match &opts.cmake {
            Some(path) => path.clone(),
            None => which::which("cmake")
                .map_err(|err| BuildError::Resource(format!("cmake not found: {}", err)))?,
        };
        let ninja = match &opts.ninja {
            Some(path) => path.clone(),
            None => which::which("ninja")
                .map_err(|err| BuildError::Resource(format!("ninja not found: {}", err)))?,
        };

        let module_paths = opts
            .modules_dir
            .as_deref()
            .map(modules::locate_from_directory)
            .unwrap_or_default();
        let zephyr_base = opts
            .zephyr_base
            .clone()
            .or_else(|| std::env::var_os("ZEPHYR_BASE").map(PathBuf::from));

        Ok(Orchestrator {
            broker,
            mux: OutputMultiplexer::new()?,
            sink: Arc::new(TracingSink),
            module_paths,
            zephyr_base,
            cmake,
            ninja,
        })
    }

    fn zephyr_base(&self) -> Result<&Path, BuildError> {
        self.zephyr_base.as_deref().ok_or_else(|| {
            BuildError::Resource(
                "no Zephyr source tree; pass --zephyr-base or set ZEPHYR_BASE".to_string(),
            )
        })
    }

    /// Generate the build system for every variant of a project.
    ///
    /// On success the build directory carries a `project` symlink back to
    /// the source project, which later `build`/`test` invocations follow.
    /// A failed configure leaves no symlink, so a half-configured
    /// directory is never mistaken for a usable one.
    pub fn configure(
        &self,
        project_dir: &Path,
        build_dir: &Path,
        opts: &ConfigureOptions,
    ) -> Result<(), BuildError> {
        let project = Project::open(project_dir)?;
        let zephyr_base = self.zephyr_base()?;

        if !opts.allow_unsupported {
            let found = read_zephyr_version(zephyr_base)?;
            if !project.config.supported_versions()?.contains(&found) {
                return Err(BuildError::Configuration(format!(
                    "Zephyr v{}.{} is not supported by {} (supported: {})",
                    found.0,
                    found.1,
                    project.project_dir().display(),
                    project.config.supported_versions.join(", "),
                )));
            }
        }

        // A build directory configured for a different project is stale
        // and gets replaced wholesale.
        let project_link = build_dir.join("project");
        if project_link.is_symlink() && normalize_path(&project_link) != *project.project_dir() {
            info!("clearing stale build directory {}", build_dir.display());
            remove_dir_all_if_exists(build_dir)?;
        }
        ensure_dir(build_dir)?;

        let modules = project.prune_modules(&self.module_paths)?;

        let mut base = BuildConfig::new().env("ZEPHYR_BASE", zephyr_base.display().to_string());
        if opts.bringup {
            base = base.kconfig_def("CONFIG_PLATFORM_EC_BRINGUP", "y");
        }
        if opts.coverage {
            base = base.kconfig_def("CONFIG_COVERAGE", "y");
        }
        if let Some(ec) = modules.get("ec") {
            base = base
                .cmake_def("PLATFORM_EC", ec.display().to_string())
                .cmake_def("DTS_ROOT", ec.join("zephyr").display().to_string())
                .cmake_def(
                    "SYSCALL_INCLUDE_DIRS",
                    ec.join("zephyr").join("include").join("drivers").display().to_string(),
                );
        }

        let toolchain_name = opts.toolchain.as_deref().unwrap_or(&project.config.toolchain);
        let toolchain_config = toolchain::get_toolchain(toolchain_name, &modules)?;
        let module_config = modules::setup_module_symlinks(&build_dir.join("modules"), &modules)?;
        let dts_config = project.find_dts_overlays(&modules);

        let mut children = Vec::new();
        for (name, variant_config) in project.iter_builds() {
            let config = base.clone()
                | toolchain_config.clone()
                | module_config.clone()
                | dts_config.clone()
                | variant_config;

            let variant_dir = build_dir.join(format!("build-{}", name));
            ensure_dir(&variant_dir)?;
            let kconfig_path = build_dir.join(format!("kconfig-{}.conf", name));
            let cmd = config.cmake_invocation(
                &self.cmake,
                project.project_dir(),
                &variant_dir,
                Some(&kconfig_path),
            )?;

            info!("configuring {}: {}", name, cmd.display_command());
            let mut child = self.broker.popen(&cmd, true, true)?;
            if let Some(stdout) = child.take_stdout() {
                self.mux
                    .watch(Arc::clone(&self.sink), Severity::Debug, stdout, Some(cmake_severity));
            }
            if let Some(stderr) = child.take_stderr() {
                self.mux
                    .watch(Arc::clone(&self.sink), Severity::Error, stderr, Some(cmake_severity));
            }
            children.push(child);
        }
        drain(children)?;

        update_symlink(project.project_dir(), &project_link)?;
        info!(
            "configured {} -> {}",
            project.project_dir().display(),
            build_dir.display()
        );

        if opts.test_after_configure {
            self.test(build_dir)?;
        } else if opts.build_after_configure {
            self.build(build_dir, &BuildOptions::default())?;
        }
        Ok(())
    }

    /// Build every variant of a configured build directory and collect
    /// the packed artifacts into `<build>/output`, returning their paths.
    pub fn build(&self, build_dir: &Path, opts: &BuildOptions) -> Result<Vec<PathBuf>, BuildError> {
        let project = Project::open(&build_dir.join("project"))?;

        // Severity accounting starts fresh for this build.
        self.mux.take_worst_severity();

        let mut build_dirs = BTreeMap::new();
        let mut children = Vec::new();
        for (name, _) in project.iter_builds() {
            let variant_dir = build_dir.join(format!("build-{}", name));
            let cmd = ProcessBuilder::new(&self.ninja).arg("-C").arg(&variant_dir);
            info!("building {}: {}", name, cmd.display_command());

            // ninja re-enters the jobserver protocol itself, so it runs
            // without a claimed slot of its own.
            let mut child = self.broker.popen(&cmd, false, true)?;
            if let Some(stdout) = child.take_stdout() {
                self.mux
                    .watch(Arc::clone(&self.sink), Severity::Info, stdout, Some(ninja_severity));
            }
            if let Some(stderr) = child.take_stderr() {
                self.mux
                    .watch(Arc::clone(&self.sink), Severity::Error, stderr, Some(cmake_severity));
            }

            if opts.sequential {
                // Check after every variant so a warning-tainted build
                // stops the next variant from starting.
                drain(vec![child])?;
                self.check_warnings(opts)?;
            } else {
                children.push(child);
            }
            build_dirs.insert(name, variant_dir);
        }
        drain(children)?;
        self.check_warnings(opts)?;

        let work_dir = build_dir.join("packer");
        ensure_dir(&work_dir)?;
        let output_dir = build_dir.join("output");
        ensure_dir(&output_dir)?;

        let mut outputs = Vec::new();
        for (artifact, name) in project.packer().pack(&work_dir, &build_dirs)? {
            let dest = output_dir.join(&name);
            std::fs::copy(&artifact, &dest).map_err(|err| {
                BuildError::Resource(format!(
                    "failed to collect {}: {}",
                    artifact.display(),
                    err
                ))
            })?;
            info!("packed {}", dest.display());
            outputs.push(dest);
        }
        Ok(outputs)
    }

    fn check_warnings(&self, opts: &BuildOptions) -> Result<(), BuildError> {
        if !opts.fail_on_warnings {
            return Ok(());
        }
        if let Some(worst) = self.mux.take_worst_severity() {
            if worst >= Severity::Warning {
                return Err(BuildError::WarningsDetected);
            }
        }
        Ok(())
    }

    /// Build a configured directory and, for test projects, run every
    /// packed artifact as a test binary.
    pub fn test(&self, build_dir: &Path) -> Result<(), BuildError> {
        let artifacts = self.build(build_dir, &BuildOptions::default())?;
        let project = Project::open(&build_dir.join("project"))?;
        if !project.config.is_test {
            return Ok(());
        }

        let mut children = Vec::new();
        for artifact in artifacts {
            let cmd = ProcessBuilder::new(&artifact);
            info!("running test {}", cmd.display_command());
            let mut child = self.broker.popen(&cmd, true, true)?;
            if let Some(stdout) = child.take_stdout() {
                self.mux
                    .watch(Arc::clone(&self.sink), Severity::Info, stdout, None);
            }
            if let Some(stderr) = child.take_stderr() {
                self.mux
                    .watch(Arc::clone(&self.sink), Severity::Error, stderr, None);
            }
            children.push(child);
        }
        drain(children)
    }

    /// Discover every project under the given roots and configure, build
    /// and (for test projects) run each one in a throwaway build
    /// directory.
    ///
    /// With `fail_fast` the first failure prevents queued projects from
    /// starting; projects already in flight finish. Scratch directories
    /// are removed whatever the outcome.
    pub fn testall(&self, roots: &[PathBuf], fail_fast: bool) -> Result<(), BuildError> {
        let mut project_dirs = Vec::new();
        for root in roots {
            for entry in WalkDir::new(root).follow_links(true) {
                let entry = entry.map_err(|err| {
                    BuildError::Resource(format!("project discovery failed: {}", err))
                })?;
                if entry.file_type().is_file() && entry.file_name() == DESCRIPTOR_NAME {
                    if let Some(dir) = entry.path().parent() {
                        project_dirs.push(dir.to_path_buf());
                    }
                }
            }
        }
        project_dirs.sort();
        info!("discovered {} projects", project_dirs.len());

        let mut scratch = Vec::new();
        let mut executor = Executor::new(fail_fast);
        for project_dir in &project_dirs {
            let project = Project::open(project_dir)?;
            let temp = tempfile::tempdir()?;
            let build_dir = temp.path().to_path_buf();
            scratch.push(temp);

            let opts = ConfigureOptions {
                build_after_configure: !project.config.is_test,
                test_after_configure: project.config.is_test,
                ..ConfigureOptions::default()
            };
            executor.append(move || self.configure(project_dir, &build_dir, &opts));
        }

        let workers = std::thread::available_parallelism().map_or(1, |n| n.get());
        let result = executor.run(workers);
        drop(scratch);
        result
    }
}

/// Wait for every child, preferring the earliest failure.
///
/// Every child is reaped even after a failure, so no token leaks and no
/// zombie outlives the operation.
fn drain(mut children: Vec<ChildHandle>) -> Result<(), BuildError> {
    let mut first: Option<BuildError> = None;
    for child in &mut children {
        if let Err(err) = child.expect_success() {
            first.get_or_insert(err);
        }
    }
    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
