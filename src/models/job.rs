use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Address selection algorithms known to the route strategy registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteStrategy {
    First,
    Last,
    Round,
    Random,
    ConsistentHash,
    LeastFrequentlyUsed,
    LeastRecentlyUsed,
    Failover,
    Busyover,
    LoadBalanced,
    ShardingBroadcast,
}

impl RouteStrategy {
    pub const ALL: [RouteStrategy; 11] = [
        RouteStrategy::First,
        RouteStrategy::Last,
        RouteStrategy::Round,
        RouteStrategy::Random,
        RouteStrategy::ConsistentHash,
        RouteStrategy::LeastFrequentlyUsed,
        RouteStrategy::LeastRecentlyUsed,
        RouteStrategy::Failover,
        RouteStrategy::Busyover,
        RouteStrategy::LoadBalanced,
        RouteStrategy::ShardingBroadcast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStrategy::First => "FIRST",
            RouteStrategy::Last => "LAST",
            RouteStrategy::Round => "ROUND",
            RouteStrategy::Random => "RANDOM",
            RouteStrategy::ConsistentHash => "CONSISTENT_HASH",
            RouteStrategy::LeastFrequentlyUsed => "LEAST_FREQUENTLY_USED",
            RouteStrategy::LeastRecentlyUsed => "LEAST_RECENTLY_USED",
            RouteStrategy::Failover => "FAILOVER",
            RouteStrategy::Busyover => "BUSYOVER",
            RouteStrategy::LoadBalanced => "LOAD_BALANCED",
            RouteStrategy::ShardingBroadcast => "SHARDING_BROADCAST",
        }
    }

    /// Strategies that fan a trigger out to every live address
    pub fn is_broadcast(&self) -> bool {
        matches!(self, RouteStrategy::ShardingBroadcast)
    }
}

impl std::fmt::Display for RouteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RouteStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .find(|strategy| strategy.as_str().eq_ignore_ascii_case(wanted))
            .copied()
            .ok_or_else(|| format!("Unknown route strategy: {wanted}"))
    }
}

/// What happens when a trigger arrives while the job is still running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockStrategy {
    /// Wait for the in-flight run to finish, then issue the new one
    SerialExecution,
    /// Drop the new trigger without contacting the worker
    DiscardLater,
    /// Issue the new trigger and cancel the in-flight one
    CoverEarly,
}

impl BlockStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockStrategy::SerialExecution => "SERIAL_EXECUTION",
            BlockStrategy::DiscardLater => "DISCARD_LATER",
            BlockStrategy::CoverEarly => "COVER_EARLY",
        }
    }
}

impl std::fmt::Display for BlockStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BlockStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SERIAL_EXECUTION" => Ok(Self::SerialExecution),
            "DISCARD_LATER" => Ok(Self::DiscardLater),
            "COVER_EARLY" => Ok(Self::CoverEarly),
            other => Err(format!("Unknown block strategy: {other}")),
        }
    }
}

/// How the worker resolves the code to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlueType {
    /// A handler compiled into the worker, looked up by name
    Bean,
    GlueShell,
    GluePython,
    GlueNodejs,
}

impl GlueType {
    pub fn is_script(&self) -> bool {
        !matches!(self, GlueType::Bean)
    }
}

/// Inline script shipped with the trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlueSource {
    pub glue_type: GlueType,
    pub source: String,
    /// Milliseconds since epoch of the last edit, lets workers reuse compiled scripts
    pub updated_at_millis: i64,
}

/// Job configuration the dispatcher builds trigger envelopes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub job_id: i64,
    pub group_id: i64,
    pub description: String,
    /// Handler name resolved on the worker
    pub handler: String,
    pub default_params: String,
    /// Route strategy identifier, resolved at dispatch time
    pub route_strategy: String,
    /// Unset jobs follow the dispatcher's configured default
    pub block_strategy: Option<BlockStrategy>,
    pub timeout: Option<Duration>,
    pub glue: Option<GlueSource>,
}

impl JobDefinition {
    pub fn new(job_id: i64, group_id: i64, handler: impl Into<String>) -> Self {
        Self {
            job_id,
            group_id,
            description: String::new(),
            handler: handler.into(),
            default_params: String::new(),
            route_strategy: RouteStrategy::Round.as_str().to_string(),
            block_strategy: None,
            timeout: None,
            glue: None,
        }
    }

    pub fn with_route_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.route_strategy = strategy.into();
        self
    }

    pub fn with_block_strategy(mut self, strategy: BlockStrategy) -> Self {
        self.block_strategy = Some(strategy);
        self
    }

    pub fn with_default_params(mut self, params: impl Into<String>) -> Self {
        self.default_params = params.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_glue(mut self, glue: GlueSource) -> Self {
        self.glue = Some(glue);
        self
    }
}
