//! Per-package build dispatch
//!
//! The [`Dispatcher`] takes one resolved descriptor through a fixed sequence
//! of steps:
//!
//! 1. **Skip** host tools without touching any collaborator
//! 2. **Acquire** sources by the descriptor's [`Acquisition`] strategy
//! 3. **Configure** with a custom command line, autotools or CMake, detected
//!    from the source tree when no custom command is given
//! 4. **Build** with `make -j<jobs>`
//! 5. **Install** with `make DESTDIR=<rootfs> install`
//!
//! Prebuilt packages are extracted straight into the rootfs and stop after
//! acquisition. Each package gets its own copy of the base environment with
//! the toolchain variables for the target overlaid.

use crate::arch::TargetArch;
use crate::context::BuildContext;
use crate::descriptor::{Acquisition, PackageDescriptor};
use crate::env::BuildEnv;
use crate::extract::{ExtractError, Extractor};
use crate::fetch::{Downloader, FetchError};
use crate::git;
use crate::pacman::PacmanBackend;
use crate::runner::{CommandRunner, ExecutionError, spec_in};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Step of a package build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStep {
    /// Download, clone or extract sources
    Acquire,
    /// Run configure or cmake
    Configure,
    /// Run make
    Build,
    /// Run make install into the rootfs
    Install,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Acquire => "acquire",
            Self::Configure => "configure",
            Self::Build => "build",
            Self::Install => "install",
        })
    }
}

/// Underlying cause of a failed build step
#[derive(Debug, Error)]
pub enum StepFailure {
    /// An external command failed
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// No mirror delivered the source
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The downloaded archive could not be unpacked
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Filesystem error outside any command
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The package manager resolved the package to nothing
    #[error("pacman returned no download URLs for {0}")]
    NoPackageUrls(String),

    /// The expected source directory is missing after acquisition
    #[error("Source directory {0} does not exist")]
    MissingSource(PathBuf),
}

/// A package failed at a specific step.
#[derive(Debug, Error)]
#[error("Failed to {step} {package}: {cause}")]
pub struct BuildError {
    /// Package that failed
    pub package: String,
    /// Step that failed
    pub step: BuildStep,
    /// What went wrong
    #[source]
    pub cause: StepFailure,
}

impl BuildError {
    /// Create a build error.
    pub fn new(
        package: impl Into<String>,
        step: BuildStep,
        cause: impl Into<StepFailure>,
    ) -> Self {
        Self {
            package: package.into(),
            step,
            cause: cause.into(),
        }
    }
}

/// How a package gets configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureStrategy {
    /// Run the descriptor's own configure command line
    Custom,
    /// `./configure --host=<triple> --prefix=/usr`
    Autotools,
    /// Out-of-source CMake configure in `build/`
    CMake,
    /// Nothing to configure
    Skip,
}

impl ConfigureStrategy {
    /// Pick the strategy for `desc` with sources in `src_dir`.
    #[must_use]
    pub fn detect(desc: &PackageDescriptor, src_dir: &Path) -> Self {
        if !desc.configure_args.is_empty() {
            Self::Custom
        } else if src_dir.join("configure").is_file() {
            Self::Autotools
        } else if src_dir.join("CMakeLists.txt").is_file() {
            Self::CMake
        } else {
            Self::Skip
        }
    }
}

/// What the dispatcher did for a package that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Configured, built and installed into the rootfs
    Built,
    /// Prebuilt archives extracted into the rootfs
    Extracted,
    /// Host tool, nothing done
    HostTool,
}

enum Acquired {
    HostTool,
    Source(PathBuf),
    InRootfs,
}

/// Executes the build of single packages against its collaborators.
pub struct Dispatcher<'a> {
    runner: &'a dyn CommandRunner,
    downloader: &'a dyn Downloader,
    extractor: &'a dyn Extractor,
    base_env: BuildEnv,
}

impl<'a> Dispatcher<'a> {
    /// Create a dispatcher. The base environment is captured from the process
    /// now.
    pub fn new(
        runner: &'a dyn CommandRunner,
        downloader: &'a dyn Downloader,
        extractor: &'a dyn Extractor,
    ) -> Self {
        Self {
            runner,
            downloader,
            extractor,
            base_env: BuildEnv::from_process(),
        }
    }

    /// Replace the base environment every package starts from.
    #[must_use]
    pub fn with_base_env(mut self, env: BuildEnv) -> Self {
        self.base_env = env;
        self
    }

    /// The environment a package for `target` will see.
    #[must_use]
    pub fn package_env(&self, target: TargetArch) -> BuildEnv {
        self.base_env.for_target(target)
    }

    /// Build one package.
    ///
    /// # Errors
    ///
    /// Returns a `BuildError` naming the package and the step that failed.
    pub fn dispatch(
        &self,
        pkg: &PackageDescriptor,
        target: TargetArch,
        ctx: &BuildContext,
    ) -> Result<DispatchOutcome, BuildError> {
        info!("=== {} {} for {} ===", pkg.name, pkg.version, target);
        let env = self.package_env(target);
        let fail = |step: BuildStep| {
            move |cause: StepFailure| BuildError::new(pkg.name.clone(), step, cause)
        };

        let src_dir = match self
            .acquire(pkg, target, ctx, &env)
            .map_err(fail(BuildStep::Acquire))?
        {
            Acquired::HostTool => {
                info!("⚡ {} is a host tool, skipping build", pkg.name);
                return Ok(DispatchOutcome::HostTool);
            }
            Acquired::InRootfs => {
                info!(
                    "✅ {} {} extracted into {}",
                    pkg.name,
                    pkg.version,
                    ctx.rootfs_dir.display()
                );
                return Ok(DispatchOutcome::Extracted);
            }
            Acquired::Source(dir) => dir,
        };
        info!("📂 Source directory: {}", src_dir.display());

        let make_dir = self
            .configure(pkg, &src_dir, target, ctx, &env)
            .map_err(fail(BuildStep::Configure))?;

        self.run(
            pkg,
            vec!["make".to_string(), format!("-j{}", ctx.jobs.max(1))],
            &make_dir,
            &env,
            "build",
        )
        .map_err(fail(BuildStep::Build))?;

        self.run(
            pkg,
            vec![
                "make".to_string(),
                format!("DESTDIR={}", ctx.rootfs_dir.display()),
                "install".to_string(),
            ],
            &make_dir,
            &env,
            "install",
        )
        .map_err(fail(BuildStep::Install))?;

        info!(
            "✅ {} {} installed into {}",
            pkg.name,
            pkg.version,
            ctx.rootfs_dir.display()
        );
        Ok(DispatchOutcome::Built)
    }

    fn run(
        &self,
        pkg: &PackageDescriptor,
        argv: Vec<String>,
        cwd: &Path,
        env: &BuildEnv,
        label: &str,
    ) -> Result<(), StepFailure> {
        let spec = spec_in(argv, cwd, env, format!("{}: {label}", pkg.name));
        Ok(self.runner.run(&spec)?)
    }

    fn acquire(
        &self,
        pkg: &PackageDescriptor,
        target: TargetArch,
        ctx: &BuildContext,
        env: &BuildEnv,
    ) -> Result<Acquired, StepFailure> {
        let extract_to = if pkg.prebuilt {
            &ctx.rootfs_dir
        } else {
            &ctx.work_dir
        };

        let fetched = match pkg.acquisition() {
            Acquisition::Host => return Ok(Acquired::HostTool),
            Acquisition::GitClone { repository } => {
                let checkout = ctx.work_dir.join(&pkg.name);
                git::sync_repository(self.runner, &pkg.name, repository, &checkout, env)?;
                // A checkout is always built from source
                return self.source_dir(pkg, ctx, checkout).map(Acquired::Source);
            }
            Acquisition::PackageManager => {
                let urls = PacmanBackend::new(self.runner).resolve_urls(
                    &pkg.name,
                    target,
                    &ctx.work_dir,
                    env,
                )?;
                if urls.is_empty() {
                    return Err(StepFailure::NoPackageUrls(pkg.name.clone()));
                }
                let mut first = None;
                for url in &urls {
                    let archive = self
                        .downloader
                        .fetch(std::slice::from_ref(url), &ctx.downloads_dir)?;
                    let root = self.extractor.extract(&archive, extract_to)?;
                    let _ = first.get_or_insert(root);
                }
                first.unwrap_or_else(|| extract_to.clone())
            }
            Acquisition::Archive { urls } => {
                let archive = self.downloader.fetch(urls, &ctx.downloads_dir)?;
                self.extractor.extract(&archive, extract_to)?
            }
        };

        if pkg.prebuilt {
            return Ok(Acquired::InRootfs);
        }
        self.source_dir(pkg, ctx, fetched).map(Acquired::Source)
    }

    fn source_dir(
        &self,
        pkg: &PackageDescriptor,
        ctx: &BuildContext,
        acquired: PathBuf,
    ) -> Result<PathBuf, StepFailure> {
        let dir = pkg.source_dir(&ctx.work_dir).unwrap_or(acquired);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(StepFailure::MissingSource(dir))
        }
    }

    /// Run the configure step and return the directory make runs in.
    fn configure(
        &self,
        pkg: &PackageDescriptor,
        src_dir: &Path,
        target: TargetArch,
        ctx: &BuildContext,
        env: &BuildEnv,
    ) -> Result<PathBuf, StepFailure> {
        let strategy = ConfigureStrategy::detect(pkg, src_dir);
        debug!("{} configure strategy: {:?}", pkg.name, strategy);

        match strategy {
            ConfigureStrategy::Custom => {
                // `{arch}` is the name the batch was asked for, as typed
                let argv = pkg.substituted_configure(
                    ctx.arch.trim(),
                    &ctx.rootfs_dir,
                    target.triple(),
                );
                self.run(pkg, argv, src_dir, env, "custom configure")?;
                Ok(src_dir.to_path_buf())
            }
            ConfigureStrategy::Autotools => {
                let mut argv = vec![
                    "./configure".to_string(),
                    format!("--host={}", target.triple()),
                    "--prefix=/usr".to_string(),
                ];
                argv.extend(pkg.extra_configure_flags.iter().cloned());
                self.run(pkg, argv, src_dir, env, "configure")?;
                Ok(src_dir.to_path_buf())
            }
            ConfigureStrategy::CMake => {
                let build_dir = src_dir.join("build");
                fs::create_dir_all(&build_dir)?;
                let mut argv = vec![
                    "cmake".to_string(),
                    "..".to_string(),
                    "-DCMAKE_INSTALL_PREFIX=/usr".to_string(),
                    "-DCMAKE_BUILD_TYPE=Release".to_string(),
                    format!("-DCMAKE_C_COMPILER={}", env.get("CC").unwrap_or("gcc")),
                    format!("-DCMAKE_CXX_COMPILER={}", env.get("CXX").unwrap_or("g++")),
                ];
                argv.extend(pkg.extra_configure_flags.iter().cloned());
                self.run(pkg, argv, &build_dir, env, "cmake configure")?;
                Ok(build_dir)
            }
            ConfigureStrategy::Skip => {
                warn!(
                    "⚠️  No configure script or CMakeLists.txt for {}, skipping configure",
                    pkg.name
                );
                Ok(src_dir.to_path_buf())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDownloader, FakeExtractor, RecordingRunner};
    use crate::descriptor::SourceKind;
    use tempfile::TempDir;

    fn archive_pkg(name: &str) -> PackageDescriptor {
        let mut desc = PackageDescriptor::new(name, "1.0");
        desc.urls = vec![format!("https://mirror.example/{name}-1.0.tar.gz")];
        desc
    }

    fn context(dir: &TempDir, arch: &str) -> BuildContext {
        let ctx = BuildContext::new(arch, dir.path()).jobs(4);
        ctx.prepare_dirs().unwrap();
        ctx
    }

    #[test]
    fn test_host_tool_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let (runner, downloader, extractor) = (
            RecordingRunner::default(),
            FakeDownloader::default(),
            FakeExtractor::default(),
        );
        let dispatcher = Dispatcher::new(&runner, &downloader, &extractor);

        let outcome = dispatcher
            .dispatch(
                &PackageDescriptor::host_tool("perl"),
                TargetArch::X86_64,
                &context(&dir, "x86_64"),
            )
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::HostTool);
        assert_eq!(runner.total_calls(), 0);
        assert_eq!(downloader.calls(), 0);
        assert_eq!(extractor.calls(), 0);
    }

    #[test]
    fn test_autotools_flow_with_extra_flags() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "x86_64");
        let (runner, downloader, extractor) = (
            RecordingRunner::default(),
            FakeDownloader::default(),
            FakeExtractor::with_files(&["configure"]),
        );
        let dispatcher = Dispatcher::new(&runner, &downloader, &extractor);
        let mut gcc = archive_pkg("gcc");
        gcc.extra_configure_flags = vec!["--disable-multilib".to_string()];

        let outcome = dispatcher.dispatch(&gcc, TargetArch::X86_64, &ctx).unwrap();
        assert_eq!(outcome, DispatchOutcome::Built);

        let argvs = runner.argvs();
        assert_eq!(
            argvs,
            vec![
                vec![
                    "./configure".to_string(),
                    "--host=x86_64-unknown-linux-gnu".to_string(),
                    "--prefix=/usr".to_string(),
                    "--disable-multilib".to_string(),
                ],
                vec!["make".to_string(), "-j4".to_string()],
                vec![
                    "make".to_string(),
                    format!("DESTDIR={}", ctx.rootfs_dir.display()),
                    "install".to_string(),
                ],
            ]
        );
        let src = ctx.work_dir.join("gcc-1.0");
        assert!(runner.specs().iter().all(|s| s.cwd == src));
    }

    #[test]
    fn test_cmake_runs_in_build_dir_with_cross_compilers() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "arm64");
        let (runner, downloader, extractor) = (
            RecordingRunner::default(),
            FakeDownloader::default(),
            FakeExtractor::with_files(&["CMakeLists.txt"]),
        );
        let dispatcher = Dispatcher::new(&runner, &downloader, &extractor);

        let _ = dispatcher
            .dispatch(&archive_pkg("json-c"), TargetArch::Aarch64, &ctx)
            .unwrap();

        let specs = runner.specs();
        let build_dir = ctx.work_dir.join("json-c-1.0").join("build");
        assert_eq!(specs.len(), 3);
        assert!(specs.iter().all(|s| s.cwd == build_dir));
        assert_eq!(specs[0].argv[..2], ["cmake", ".."]);
        assert!(specs[0]
            .argv
            .contains(&"-DCMAKE_C_COMPILER=aarch64-linux-gnu-gcc".to_string()));
        assert!(specs[0]
            .argv
            .contains(&"-DCMAKE_CXX_COMPILER=aarch64-linux-gnu-g++".to_string()));
        assert_eq!(
            specs[0].env.get("CROSS_COMPILE").map(String::as_str),
            Some("aarch64-linux-gnu-")
        );
    }

    #[test]
    fn test_custom_configure_is_substituted() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "arm64");
        let (runner, downloader, extractor) = (
            RecordingRunner::default(),
            FakeDownloader::default(),
            FakeExtractor::with_files(&["configure", "Makefile"]),
        );
        let dispatcher = Dispatcher::new(&runner, &downloader, &extractor);
        let mut busybox = archive_pkg("busybox");
        busybox.configure_args = vec![
            "make".to_string(),
            "ARCH={arch}".to_string(),
            "defconfig".to_string(),
        ];

        let _ = dispatcher.dispatch(&busybox, TargetArch::Aarch64, &ctx).unwrap();

        let argvs = runner.argvs();
        assert_eq!(argvs[0], vec!["make", "ARCH=arm64", "defconfig"]);
        assert_eq!(argvs.len(), 3);
    }

    #[test]
    fn test_no_build_system_skips_configure() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "x86_64");
        let (runner, downloader, extractor) = (
            RecordingRunner::default(),
            FakeDownloader::default(),
            FakeExtractor::with_files(&["Makefile"]),
        );
        let dispatcher = Dispatcher::new(&runner, &downloader, &extractor);

        let _ = dispatcher
            .dispatch(&archive_pkg("inxi"), TargetArch::X86_64, &ctx)
            .unwrap();

        let argvs = runner.argvs();
        assert_eq!(argvs.len(), 2);
        assert!(argvs.iter().all(|a| a[0] == "make"));
    }

    #[test]
    fn test_failing_build_names_step() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "x86_64");
        let (runner, downloader, extractor) = (
            RecordingRunner::failing_on(|spec| spec.argv.iter().any(|a| a.starts_with("-j"))),
            FakeDownloader::default(),
            FakeExtractor::default(),
        );
        let dispatcher = Dispatcher::new(&runner, &downloader, &extractor);

        let err = dispatcher
            .dispatch(&archive_pkg("zlib"), TargetArch::X86_64, &ctx)
            .unwrap_err();

        assert_eq!(err.package, "zlib");
        assert_eq!(err.step, BuildStep::Build);
        assert!(matches!(
            err.cause,
            StepFailure::Execution(ExecutionError::NonZeroExit { code: 2, .. })
        ));
        // install never ran
        assert_eq!(runner.total_calls(), 2);
    }

    #[test]
    fn test_missing_source_dir_fails_acquire() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "x86_64");
        let (runner, downloader, extractor) = (
            RecordingRunner::default(),
            FakeDownloader::default(),
            FakeExtractor::default(),
        );
        let dispatcher = Dispatcher::new(&runner, &downloader, &extractor);
        let mut pkg = archive_pkg("ncurses");
        pkg.source_template = "ncurses-{version}-renamed".to_string();

        let err = dispatcher.dispatch(&pkg, TargetArch::X86_64, &ctx).unwrap_err();
        assert_eq!(err.step, BuildStep::Acquire);
        assert!(matches!(
            err.cause,
            StepFailure::MissingSource(ref p) if p.ends_with("ncurses-1.0-renamed")
        ));
        assert_eq!(runner.total_calls(), 0);
    }

    #[test]
    fn test_prebuilt_package_manager_path() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "x86_64");
        let runner = RecordingRunner::with_capture_output(
            "https://mirror.example/core/os/x86_64/ncurses-6.4-x86_64.pkg.tar.zst\n\
             https://mirror.example/core/os/x86_64/nano-8.0-x86_64.pkg.tar.zst\n",
        );
        let (downloader, extractor) = (FakeDownloader::default(), FakeExtractor::default());
        let dispatcher = Dispatcher::new(&runner, &downloader, &extractor);
        let mut nano = PackageDescriptor::new("nano", "8.0");
        nano.source = Some(SourceKind::Pacman);
        nano.prebuilt = true;

        let outcome = dispatcher.dispatch(&nano, TargetArch::X86_64, &ctx).unwrap();

        assert_eq!(outcome, DispatchOutcome::Extracted);
        assert_eq!(runner.captured()[0].argv[..2], ["pacman", "-Sp"]);
        assert_eq!(downloader.calls(), 2);
        assert_eq!(extractor.destinations(), vec![ctx.rootfs_dir.clone(), ctx.rootfs_dir.clone()]);
        assert!(runner.argvs().is_empty());
    }

    #[test]
    fn test_empty_pacman_answer_fails_acquire() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "x86_64");
        let runner = RecordingRunner::with_capture_output("");
        let (downloader, extractor) = (FakeDownloader::default(), FakeExtractor::default());
        let dispatcher = Dispatcher::new(&runner, &downloader, &extractor);

        let err = dispatcher
            .dispatch(&PackageDescriptor::new("nano", "8.0"), TargetArch::X86_64, &ctx)
            .unwrap_err();
        assert_eq!(err.step, BuildStep::Acquire);
        assert!(matches!(err.cause, StepFailure::NoPackageUrls(_)));
    }

    #[test]
    fn test_git_clone_builds_checkout() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, "x86_64");
        // The fake clone creates the checkout so the source dir exists
        let runner = RecordingRunner::on_run(|spec| {
            if spec.argv.get(1).map(String::as_str) == Some("clone") {
                if let Some(dest) = spec.argv.last() {
                    fs::create_dir_all(dest).unwrap();
                }
            }
        });
        let (downloader, extractor) = (FakeDownloader::default(), FakeExtractor::default());
        let dispatcher = Dispatcher::new(&runner, &downloader, &extractor);
        let mut opkg = PackageDescriptor::new("opkg", "0.6.3");
        opkg.source = Some(SourceKind::Git);
        opkg.repository = Some("https://git.yoctoproject.org/opkg".to_string());

        let outcome = dispatcher.dispatch(&opkg, TargetArch::X86_64, &ctx).unwrap();

        assert_eq!(outcome, DispatchOutcome::Built);
        let argvs = runner.argvs();
        assert_eq!(argvs[0][..2], ["git", "clone"]);
        assert_eq!(argvs.len(), 3);
        assert_eq!(downloader.calls(), 0);
        assert!(runner.specs()[1..].iter().all(|s| s.cwd == ctx.work_dir.join("opkg")));
    }

    #[test]
    fn test_each_package_gets_fresh_env() {
        let runner = RecordingRunner::default();
        let (downloader, extractor) = (FakeDownloader::default(), FakeExtractor::default());
        let dispatcher = Dispatcher::new(&runner, &downloader, &extractor)
            .with_base_env(BuildEnv::from_vars([("PATH", "/usr/bin")]));

        let arm = dispatcher.package_env(TargetArch::Aarch64);
        let x86 = dispatcher.package_env(TargetArch::X86_64);

        assert_eq!(arm.get("CC"), Some("aarch64-linux-gnu-gcc"));
        assert_eq!(x86.get("CC"), Some("gcc"));
        assert_eq!(x86.get("CROSS_COMPILE"), None);
        assert_eq!(x86.get("PATH"), Some("/usr/bin"));
    }
}
