use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Code generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Plain sequential loops.
    #[default]
    Cpu,
    /// SIMD loops over the vectorized lattice.
    Vector,
    Cuda,
    Hip,
}

impl Target {
    pub fn is_gpu(self) -> bool {
        matches!(self, Target::Cuda | Target::Hip)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Target::Cpu => "cpu",
            Target::Vector => "vector",
            Target::Cuda => "cuda",
            Target::Hip => "hip",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Target::Cpu),
            "vector" | "avx" | "simd" => Ok(Target::Vector),
            "cuda" => Ok(Target::Cuda),
            "hip" => Ok(Target::Hip),
            other => Err(ConfigError::Invalid(format!("unknown target '{}'", other))),
        }
    }
}

/// Transpiler settings, loadable from `hilapp.yaml` and overridden by
/// command line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranspilerConfig {
    pub target: Target,
    /// SIMD register width in bits for the vector target.
    pub vector_bits: u32,
    /// Overlap neighbour communication with computation on interior sites.
    pub overlap_communication: bool,
    /// Allow functions called from site loops to read global variables.
    pub allow_func_globals: bool,
    /// Emit a comment before each transformed function listing its loops.
    pub function_info: bool,
    /// 0 is quiet; 1 and above report remarks such as non-vectorizable loops.
    pub verbosity: u8,
    /// Element types allowed as targets of `*=` reductions.
    pub product_reduction_types: Vec<String>,
    /// Extra element types and the scalar type their SIMD lanes hold,
    /// e.g. `MyVec3: double`.
    pub vector_types: IndexMap<String, String>,
    /// Threads per block for GPU kernel launches.
    pub gpu_block_size: u32,
}

impl Default for TranspilerConfig {
    fn default() -> Self {
        Self {
            target: Target::Cpu,
            vector_bits: 256,
            overlap_communication: true,
            allow_func_globals: false,
            function_info: false,
            verbosity: 0,
            product_reduction_types: [
                "double",
                "float",
                "int",
                "long",
                "int64_t",
                "Complex<double>",
                "Complex<float>",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            vector_types: IndexMap::new(),
            gpu_block_size: 256,
        }
    }
}

impl TranspilerConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: TranspilerConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.vector_bits, 128 | 256 | 512) {
            return Err(ConfigError::Invalid(format!(
                "vector_bits must be 128, 256 or 512, got {}",
                self.vector_bits
            )));
        }
        if self.gpu_block_size == 0 {
            return Err(ConfigError::Invalid("gpu_block_size must be positive".into()));
        }
        Ok(())
    }

    /// Whether `ty` may be the target of a product reduction.
    pub fn allows_product_reduction(&self, ty: &str) -> bool {
        let ty: String = ty.split_whitespace().collect();
        self.product_reduction_types
            .iter()
            .any(|t| t.split_whitespace().collect::<String>() == ty)
    }

    /// Short stable hash of the settings, recorded in generated files.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex()[..16].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TranspilerConfig::default();
        assert_eq!(config.target, Target::Cpu);
        assert_eq!(config.vector_bits, 256);
        assert!(config.overlap_communication);
        assert!(config.allows_product_reduction("Complex<double>"));
        assert!(!config.allows_product_reduction("Matrix<3,3,double>"));
    }

    #[test]
    fn test_yaml_partial_override() {
        let config = TranspilerConfig::from_yaml_str(
            "target: vector\nvector_bits: 512\nvector_types:\n  MyVec3: double\n",
        )
        .unwrap();
        assert_eq!(config.target, Target::Vector);
        assert_eq!(config.vector_bits, 512);
        assert_eq!(config.vector_types.get("MyVec3").map(String::as_str), Some("double"));
        assert!(config.overlap_communication);
    }

    #[test]
    fn test_invalid_vector_bits() {
        let err = TranspilerConfig::from_yaml_str("vector_bits: 100\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hilapp.yaml");
        std::fs::write(&path, "target: hip\ngpu_block_size: 64\n").unwrap();
        let config = TranspilerConfig::from_file(&path).unwrap();
        assert_eq!(config.target, Target::Hip);
        assert_eq!(config.gpu_block_size, 64);

        let missing = TranspilerConfig::from_file(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn test_fingerprint_tracks_settings() {
        let a = TranspilerConfig::default();
        let mut b = TranspilerConfig::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.target = Target::Cuda;
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn test_target_from_str() {
        assert_eq!("CUDA".parse::<Target>().unwrap(), Target::Cuda);
        assert!("fortran".parse::<Target>().is_err());
    }
}
