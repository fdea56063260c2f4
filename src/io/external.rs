use crate::config::PipelineConfig;
use crate::core::GeoReference;
use crate::types::{CleanupError, CleanupResult};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

/// One external command: program name plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    /// Value following `flag`, if present
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(|s| s.as_str())
    }
}

/// Runs external geospatial tools and reports their exit status
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &ToolInvocation) -> CleanupResult<i32>;
}

/// Runs tools as child processes, retrying failed runs with linear backoff
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    max_retries: u32,
    backoff: Duration,
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

impl SystemCommandRunner {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self { max_retries, backoff }
    }

    /// Runner using the configured retry count and backoff step
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.tool_retries, config.tool_backoff())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, invocation: &ToolInvocation) -> CleanupResult<i32> {
        let attempts = self.max_retries + 1;
        let mut status = -1;

        for attempt in 1..=attempts {
            log::debug!(
                "Running {} {} (attempt {} of {})",
                invocation.program,
                invocation.args.join(" "),
                attempt,
                attempts
            );

            let outcome = Command::new(&invocation.program).args(&invocation.args).status()?;
            status = outcome.code().unwrap_or(-1);
            if status == 0 {
                return Ok(0);
            }

            if attempt < attempts {
                log::warn!(
                    "{} exited with status {}, retrying...",
                    invocation.program,
                    status
                );
                thread::sleep(self.backoff * attempt);
            }
        }

        Ok(status)
    }
}

/// Run `invocation` and turn a non-zero exit into an error
pub fn run_checked(runner: &dyn CommandRunner, invocation: &ToolInvocation) -> CleanupResult<()> {
    let status = runner.run(invocation)?;
    if status != 0 {
        log::error!("{} FAILED with status {}", invocation.program, status);
        return Err(CleanupError::ExternalTool {
            tool: invocation.program.clone(),
            status,
        });
    }
    Ok(())
}

/// Burns a vector attribute into a raster aligned with a base grid
#[derive(Debug, Clone)]
pub struct Rasterizer {
    pub creation_options: Vec<String>,
    pub output_type: String,
}

impl Default for Rasterizer {
    fn default() -> Self {
        Self {
            creation_options: vec!["COMPRESS=LZW".to_string(), "TILED=YES".to_string()],
            output_type: "UInt32".to_string(),
        }
    }
}

impl Rasterizer {
    /// Build the `gdal_rasterize` call for a base grid of `width` x `height`
    /// pixels under `geo`
    pub fn invocation(
        &self,
        vector: &Path,
        layer: &str,
        attribute: &str,
        geo: &GeoReference,
        width: usize,
        height: usize,
        output: &Path,
    ) -> ToolInvocation {
        let x_min = geo.x_origin();
        let y_max = geo.y_origin();
        let x_max = geo.col_to_lon(width as f64);
        let y_min = geo.row_to_lat(height as f64);

        let mut invocation = ToolInvocation::new("gdal_rasterize");
        for option in &self.creation_options {
            invocation = invocation.arg("-co").arg(option.clone());
        }

        invocation
            .arg("-ot")
            .arg(self.output_type.clone())
            .arg("-te")
            .arg(x_min.to_string())
            .arg(y_min.to_string())
            .arg(x_max.to_string())
            .arg(y_max.to_string())
            .arg("-tr")
            .arg(geo.x_step().to_string())
            .arg(geo.y_step().abs().to_string())
            .arg("-l")
            .arg(layer)
            .arg("-a")
            .arg(attribute)
            .path_arg(vector)
            .path_arg(output)
    }

    pub fn rasterize(
        &self,
        runner: &dyn CommandRunner,
        vector: &Path,
        layer: &str,
        attribute: &str,
        geo: &GeoReference,
        size: (usize, usize),
        output: &Path,
    ) -> CleanupResult<()> {
        log::info!("Rasterizing {} by {}", vector.display(), attribute);
        if output.exists() {
            fs::remove_file(output)?;
        }

        let (width, height) = size;
        let invocation = self.invocation(vector, layer, attribute, geo, width, height, output);
        run_checked(runner, &invocation)
    }
}

/// Final reprojection and resampling of a product raster
#[derive(Debug, Clone)]
pub struct ProductFinalizer {
    pub x_resolution: f64,
    pub y_resolution: f64,
    pub projection: String,
    pub options: Vec<String>,
}

impl ProductFinalizer {
    pub fn new(x_resolution: f64, y_resolution: f64, projection: impl Into<String>) -> Self {
        Self {
            x_resolution,
            y_resolution,
            projection: projection.into(),
            options: ["-co", "COMPRESS=LZW", "-co", "TILED=YES", "-r", "near", "-q"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn invocation(&self, source: &Path, product: &Path) -> ToolInvocation {
        let mut invocation = ToolInvocation::new("gdalwarp")
            .arg("-tr")
            .arg(self.x_resolution.to_string())
            .arg(self.y_resolution.to_string())
            .arg("-t_srs")
            .arg(self.projection.clone());

        for option in &self.options {
            invocation = invocation.arg(option.clone());
        }

        invocation.path_arg(source).path_arg(product)
    }

    /// Warp `source` into `scratch`, then move the finished file to `product`
    pub fn finalize(
        &self,
        runner: &dyn CommandRunner,
        source: &Path,
        scratch: &Path,
        product: &Path,
    ) -> CleanupResult<()> {
        log::info!("Finalizing product {}", product.display());

        if !self.projection.trim_start().starts_with('+') && !self.projection.contains(':') {
            return Err(CleanupError::Config(format!(
                "product projection is not a PROJ or authority string: {:?}",
                self.projection
            )));
        }

        for stale in [scratch, product] {
            if stale.exists() {
                fs::remove_file(stale)?;
            }
        }

        run_checked(runner, &self.invocation(source, scratch))?;

        if fs::rename(scratch, product).is_err() {
            fs::copy(scratch, product)?;
            fs::remove_file(scratch)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    struct Recording {
        status: i32,
        calls: Mutex<Vec<ToolInvocation>>,
    }

    impl CommandRunner for Recording {
        fn run(&self, invocation: &ToolInvocation) -> CleanupResult<i32> {
            self.calls.lock().unwrap().push(invocation.clone());
            Ok(self.status)
        }
    }

    #[test]
    fn test_rasterize_command_uses_base_grid() {
        let geo = GeoReference::new(100.0, 30.0, 900.0, -30.0).unwrap();
        let invocation = Rasterizer::default().invocation(
            &PathBuf::from("oh.shp"),
            "oh",
            "ID",
            &geo,
            10,
            20,
            &PathBuf::from("oh-clu.tif"),
        );

        assert_eq!(invocation.program, "gdal_rasterize");
        assert_eq!(invocation.flag_value("-ot"), Some("UInt32"));
        assert_eq!(invocation.flag_value("-a"), Some("ID"));
        assert_eq!(invocation.flag_value("-l"), Some("oh"));

        let te = invocation.args.iter().position(|a| a == "-te").unwrap();
        assert_eq!(&invocation.args[te + 1..te + 5], &["100", "300", "400", "900"]);
        let tr = invocation.args.iter().position(|a| a == "-tr").unwrap();
        assert_eq!(&invocation.args[tr + 1..tr + 3], &["30", "30"]);
        assert_eq!(invocation.args.last().map(|s| s.as_str()), Some("oh-clu.tif"));
    }

    #[test]
    fn test_non_zero_exit_is_external_tool_error() {
        let runner = Recording { status: 2, calls: Mutex::new(Vec::new()) };
        let invocation = ToolInvocation::new("gdalwarp").arg("-q");

        match run_checked(&runner, &invocation) {
            Err(CleanupError::ExternalTool { tool, status }) => {
                assert_eq!(tool, "gdalwarp");
                assert_eq!(status, 2);
            }
            other => panic!("expected ExternalTool error, got {:?}", other),
        }
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_finalizer_rejects_bad_projection() {
        let runner = Recording { status: 0, calls: Mutex::new(Vec::new()) };
        let finalizer = ProductFinalizer::new(30.0, 30.0, "not a projection");
        let dir = tempfile::TempDir::new().unwrap();

        let result = finalizer.finalize(
            &runner,
            &dir.path().join("in.tif"),
            &dir.path().join("scratch.tif"),
            &dir.path().join("out.tif"),
        );
        assert!(matches!(result, Err(CleanupError::Config(_))));
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_warp_command() {
        let finalizer = ProductFinalizer::new(30.0, 30.0, "+proj=aea +lat_1=29.5");
        let invocation = finalizer.invocation(&PathBuf::from("a.tif"), &PathBuf::from("b.tif"));
        assert_eq!(invocation.program, "gdalwarp");
        assert_eq!(invocation.flag_value("-t_srs"), Some("+proj=aea +lat_1=29.5"));
        assert_eq!(invocation.flag_value("-r"), Some("near"));
        assert_eq!(invocation.args[invocation.args.len() - 2], "a.tif");
    }

    #[test]
    fn test_runner_built_from_config() {
        let mut config = PipelineConfig::default();
        config.tool_retries = 3;
        config.tool_backoff_ms = 20;

        let runner = SystemCommandRunner::from_config(&config);
        assert_eq!(runner.max_retries(), 3);
        assert_eq!(runner.backoff(), Duration::from_millis(20));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_tool_is_retried() {
        let dir = tempfile::TempDir::new().unwrap();
        let attempts = dir.path().join("attempts");
        let script = format!("echo x >> '{}'; exit 3", attempts.display());
        let invocation = ToolInvocation::new("sh").arg("-c").arg(script);

        let runner = SystemCommandRunner::new(2, Duration::from_millis(1));
        assert_eq!(runner.run(&invocation).unwrap(), 3);
        assert_eq!(std::fs::read_to_string(&attempts).unwrap().lines().count(), 3);

        match run_checked(&runner, &invocation) {
            Err(CleanupError::ExternalTool { tool, status }) => {
                assert_eq!(tool, "sh");
                assert_eq!(status, 3);
            }
            other => panic!("expected ExternalTool error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_tool_runs_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let attempts = dir.path().join("attempts");
        let script = format!("echo x >> '{}'", attempts.display());
        let invocation = ToolInvocation::new("sh").arg("-c").arg(script);

        let runner = SystemCommandRunner::new(4, Duration::from_millis(1));
        assert_eq!(runner.run(&invocation).unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&attempts).unwrap().lines().count(), 1);
    }
}
