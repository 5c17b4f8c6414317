use crate::clock::{Clock, DEFAULT_POLL_INTERVAL_MS};
use crate::dom::DomAccessor;
use crate::resolution::{DEFAULT_RESOLVE_TIMEOUT_MS, ResolveOptions};
use crate::wait::{DEFAULT_DOM_QUIET_MS, DEFAULT_NETWORK_IDLE_MS, StateWaiter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetraceConfig {
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub wait: WaitConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub replay: ReplaySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_resolve_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wait for the winner to be visible and enabled before acting on it.
    #[serde(default = "default_true")]
    pub require_actionable: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_resolve_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            require_actionable: true,
        }
    }
}

impl ResolverConfig {
    pub fn options(&self) -> ResolveOptions {
        ResolveOptions {
            timeout_ms: self.timeout_ms,
            poll_interval_ms: self.poll_interval_ms,
            require_actionable: self.require_actionable,
            ..Default::default()
        }
    }
}

fn default_resolve_timeout_ms() -> u64 {
    DEFAULT_RESOLVE_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Evaluate a step's suggested condition after the action.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Element leaves without a scope default to the step's scope instead of the page.
    #[serde(default)]
    pub inherit_step_scope: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            inherit_step_scope: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_dom_quiet_ms")]
    pub dom_quiet_ms: u64,
    #[serde(default = "default_network_idle_ms")]
    pub network_idle_ms: u64,
    /// Added to the built-in loader selectors.
    #[serde(default)]
    pub loader_selectors: Vec<String>,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            dom_quiet_ms: default_dom_quiet_ms(),
            network_idle_ms: default_network_idle_ms(),
            loader_selectors: Vec::new(),
        }
    }
}

impl WaitConfig {
    pub fn waiter<'a>(&self, dom: &'a dyn DomAccessor, clock: &'a dyn Clock) -> StateWaiter<'a> {
        StateWaiter::new(dom, clock)
            .with_poll_interval(self.poll_interval_ms)
            .with_loader_selectors(self.loader_selectors.iter().cloned())
    }
}

fn default_dom_quiet_ms() -> u64 {
    DEFAULT_DOM_QUIET_MS
}

fn default_network_idle_ms() -> u64 {
    DEFAULT_NETWORK_IDLE_MS
}

/// Which recovery steps may run, in their fixed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub widen_scope: bool,
    #[serde(default = "default_true")]
    pub drop_weak_strategies: bool,
    #[serde(default = "default_true")]
    pub scroll_into_view: bool,
    #[serde(default = "default_true")]
    pub settle_and_reverify: bool,
    /// Budget for the loaders-gone and DOM-stable waits before re-verifying.
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,
    /// Offer one extra strategy from a recovered element to the correction channel.
    #[serde(default = "default_true")]
    pub propose_strategies: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            widen_scope: true,
            drop_weak_strategies: true,
            scroll_into_view: true,
            settle_and_reverify: true,
            settle_timeout_ms: default_settle_timeout_ms(),
            propose_strategies: true,
        }
    }
}

fn default_settle_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySettings {
    #[serde(default = "default_true")]
    pub stop_on_failure: bool,
    /// Overall budget for one step, recovery included. 0 disables it.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    /// Log a warning when the page origin differs from the recorded one.
    #[serde(default = "default_true")]
    pub check_origin: bool,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            stop_on_failure: true,
            step_timeout_ms: default_step_timeout_ms(),
            check_origin: true,
        }
    }
}

fn default_step_timeout_ms() -> u64 {
    30000
}
