use std::fmt;
use std::str::FromStr;

/// Which engine carries the DTW compute.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Engine {
    Auto,
    Cpu,
    Cuda,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::Auto
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Engine::Auto),
            "cpu" => Ok(Engine::Cpu),
            "cuda" | "gpu" => Ok(Engine::Cuda),
            other => Err(format!(
                "unknown engine '{}' (expected auto, cpu or cuda)",
                other
            )),
        }
    }
}

/// What the run should produce. The numeric values are part of the CLI
/// contract and must stay stable.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum AlgoMode {
    ClusterOnly = 1,
    ConsensusOnly = 2,
    ClusterAndConsensus = 3,
}

impl AlgoMode {
    pub fn from_number(n: u8) -> Option<AlgoMode> {
        match n {
            1 => Some(AlgoMode::ClusterOnly),
            2 => Some(AlgoMode::ConsensusOnly),
            3 => Some(AlgoMode::ClusterAndConsensus),
            _ => None,
        }
    }

    pub fn clusters(&self) -> bool {
        matches!(self, AlgoMode::ClusterOnly | AlgoMode::ClusterAndConsensus)
    }

    pub fn consensus(&self) -> bool {
        matches!(self, AlgoMode::ConsensusOnly | AlgoMode::ClusterAndConsensus)
    }
}

impl fmt::Display for AlgoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgoMode::ClusterOnly => write!(f, "cluster-only"),
            AlgoMode::ConsensusOnly => write!(f, "consensus-only"),
            AlgoMode::ClusterAndConsensus => write!(f, "cluster-and-consensus"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algo_mode_numbers_are_stable() {
        assert_eq!(AlgoMode::from_number(1), Some(AlgoMode::ClusterOnly));
        assert_eq!(AlgoMode::from_number(2), Some(AlgoMode::ConsensusOnly));
        assert_eq!(AlgoMode::from_number(3), Some(AlgoMode::ClusterAndConsensus));
        assert_eq!(AlgoMode::from_number(0), None);
        assert_eq!(AlgoMode::from_number(4), None);
    }

    #[test]
    fn engine_parses_aliases() {
        assert_eq!("auto".parse::<Engine>(), Ok(Engine::Auto));
        assert_eq!("GPU".parse::<Engine>(), Ok(Engine::Cuda));
        assert!("tpu".parse::<Engine>().is_err());
    }
}
