use crate::backend::{ExecutionMode, EXECUTION_MODE_VAR};
use crate::error::{HydroError, HydroResult};
use json::JsonValue;
#[cfg(feature = "json_export")]
use json::object;
use std::fmt;
use std::fs::read_to_string;
use std::path::Path;
use std::str::FromStr;

/// How the force operator is applied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssemblyMode {
    /// Matrix-free tensor-product kernels (squares and cubes)
    Partial,
    /// Dense per-zone matrices (any shape)
    Full,
}

impl FromStr for AssemblyMode {
    type Err = HydroError;

    fn from_str(s: &str) -> HydroResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "partial" | "pa" => Ok(Self::Partial),
            "full" | "fa" => Ok(Self::Full),
            other => Err(HydroError::InvalidConfig(format!("unknown assembly mode '{}'", other))),
        }
    }
}

impl fmt::Display for AssemblyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partial => write!(f, "partial"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Run-time parameters of the hydro operator
#[derive(Clone, Debug, PartialEq)]
pub struct HydroConfig {
    /// Courant number applied to the local time-step estimates
    pub cfl: f64,
    /// Enable the tensor artificial viscosity
    pub use_viscosity: bool,
    pub assembly: AssemblyMode,
    pub execution: ExecutionMode,
    /// Zones processed per quadrature-data batch
    pub batch_size: usize,
    pub cg_rel_tol: f64,
    pub cg_abs_tol: f64,
    pub cg_max_iter: usize,
    /// Uniform adiabatic index
    pub gamma: f64,
}

impl Default for HydroConfig {
    fn default() -> Self {
        Self {
            cfl: 0.5,
            use_viscosity: true,
            assembly: AssemblyMode::Partial,
            execution: ExecutionMode::Parallel,
            batch_size: 3,
            cg_rel_tol: 1e-8,
            cg_abs_tol: 0.0,
            cg_max_iter: 300,
            gamma: 5.0 / 3.0,
        }
    }
}

impl HydroConfig {
    pub fn validate(&self) -> HydroResult<()> {
        if !(self.cfl > 0.0) {
            return Err(HydroError::InvalidConfig(format!("cfl must be positive, got {}", self.cfl)));
        }
        if self.batch_size == 0 {
            return Err(HydroError::InvalidConfig("batch_size must be at least 1".to_owned()));
        }
        if self.cg_max_iter == 0 || self.cg_rel_tol < 0.0 || self.cg_abs_tol < 0.0 {
            return Err(HydroError::InvalidConfig("invalid CG tolerances".to_owned()));
        }
        if !(self.gamma > 1.0) {
            return Err(HydroError::InvalidConfig(format!("gamma must exceed 1, got {}", self.gamma)));
        }
        Ok(())
    }

    /// Parse a JSON configuration; missing keys keep their defaults
    ///
    /// ```
    /// use lagrangian_hydro::{AssemblyMode, HydroConfig};
    ///
    /// let config = HydroConfig::from_json_str(r#"{ "cfl": 0.25, "assembly": "full" }"#).unwrap();
    /// assert_eq!(config.cfl, 0.25);
    /// assert_eq!(config.assembly, AssemblyMode::Full);
    /// assert_eq!(config.batch_size, 3);
    /// ```
    pub fn from_json_str(contents: &str) -> HydroResult<Self> {
        let parsed = json::parse(contents)?;
        let mut config = Self::default();

        if let Some(cfl) = parsed["cfl"].as_f64() {
            config.cfl = cfl;
        }
        if let Some(viscosity) = parsed["viscosity"].as_bool() {
            config.use_viscosity = viscosity;
        }
        if let Some(assembly) = parsed["assembly"].as_str() {
            config.assembly = assembly.parse()?;
        }
        if let Some(execution) = parsed["execution"].as_str() {
            config.execution = execution.parse()?;
        }
        if let Some(batch_size) = parsed["batch_size"].as_usize() {
            config.batch_size = batch_size;
        }
        if let Some(gamma) = parsed["gamma"].as_f64() {
            config.gamma = gamma;
        }
        read_cg_section(&parsed["cg"], &mut config);

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> HydroResult<Self> {
        let contents = read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Apply the `HYDRO_EXECUTION` environment override, if set
    pub fn with_env_overrides(mut self) -> HydroResult<Self> {
        if let Ok(mode) = std::env::var(EXECUTION_MODE_VAR) {
            self.execution = mode.parse()?;
            log::info!("execution mode overridden to {} by {}", self.execution, EXECUTION_MODE_VAR);
        }
        Ok(self)
    }
}

fn read_cg_section(cg: &JsonValue, config: &mut HydroConfig) {
    if let Some(rel_tol) = cg["rel_tol"].as_f64() {
        config.cg_rel_tol = rel_tol;
    }
    if let Some(abs_tol) = cg["abs_tol"].as_f64() {
        config.cg_abs_tol = abs_tol;
    }
    if let Some(max_iter) = cg["max_iter"].as_usize() {
        config.cg_max_iter = max_iter;
    }
}

#[cfg(feature = "json_export")]
impl From<&HydroConfig> for JsonValue {
    fn from(config: &HydroConfig) -> Self {
        object! {
            "cfl": config.cfl,
            "viscosity": config.use_viscosity,
            "assembly": config.assembly.to_string(),
            "execution": config.execution.to_string(),
            "batch_size": config.batch_size,
            "gamma": config.gamma,
            "cg": object! {
                "rel_tol": config.cg_rel_tol,
                "abs_tol": config.cg_abs_tol,
                "max_iter": config.cg_max_iter,
            },
        }
    }
}
