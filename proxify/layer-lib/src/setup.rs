//! Process-wide state of the layer, written once during initialization.

use std::sync::{
    OnceLock,
    atomic::{AtomicBool, Ordering},
};

use proxify_config::LayerConfig;

use crate::{
    datagram::DatagramPolicy,
    dns::NameRewriter,
    error::{LayerError, LayerResult},
    fakeip::FakeIpTable,
    redirect::{ProxyEndpoints, Redirector},
    selector::ConnectSelector,
};

static SETUP: OnceLock<LayerSetup> = OnceLock::new();

/// Set by [`teardown_setup`], after which the intercepts only call the original functions.
static DETACHED: AtomicBool = AtomicBool::new(false);

/// Owns the configuration and the fake address table; the per-call helpers borrow from it.
#[derive(Debug)]
pub struct LayerSetup {
    config: LayerConfig,
    fake_ips: FakeIpTable,
    endpoints: ProxyEndpoints,
}

impl LayerSetup {
    /// Resolves the proxy host. A proxy that can't be resolved puts the layer in pass-through
    /// mode.
    pub fn new(mut config: LayerConfig) -> Self {
        let endpoints = if config.proxy.is_enabled() {
            match ProxyEndpoints::resolve(&config.proxy) {
                Ok(endpoints) => endpoints,
                Err(error) => {
                    tracing::warn!(
                        proxy = %config.proxy,
                        %error,
                        "could not resolve proxy, running in pass-through mode"
                    );
                    config.proxy = Default::default();
                    ProxyEndpoints::default()
                }
            }
        } else {
            ProxyEndpoints::default()
        };

        Self::with_endpoints(config, endpoints)
    }

    pub fn with_endpoints(config: LayerConfig, endpoints: ProxyEndpoints) -> Self {
        Self {
            config,
            fake_ips: FakeIpTable::new(),
            endpoints,
        }
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn fake_ips(&self) -> &FakeIpTable {
        &self.fake_ips
    }

    pub fn endpoints(&self) -> &ProxyEndpoints {
        &self.endpoints
    }

    pub fn selector(&self) -> ConnectSelector<'_> {
        ConnectSelector::new(&self.config, &self.fake_ips)
    }

    pub fn redirector(&self) -> Redirector<'_> {
        Redirector::new(self.selector(), &self.config.proxy, &self.endpoints)
    }

    pub fn datagram_policy(&self) -> DatagramPolicy<'_> {
        DatagramPolicy::new(&self.config)
    }

    pub fn name_rewriter(&self) -> NameRewriter<'_> {
        NameRewriter::new(&self.config, &self.fake_ips)
    }
}

/// Stores the global [`LayerSetup`]. Fails if called twice.
pub fn init_setup(config: LayerConfig) -> LayerResult<&'static LayerSetup> {
    SETUP
        .set(LayerSetup::new(config))
        .map_err(|_| LayerError::GlobalAlreadyInitialized("layer setup"))?;
    DETACHED.store(false, Ordering::Release);

    let setup = layer_setup().ok_or(LayerError::GlobalAlreadyInitialized("layer setup"))?;
    tracing::info!(proxy = %setup.config.proxy, "layer initialized");

    Ok(setup)
}

/// The global setup, `None` before [`init_setup`] and after [`teardown_setup`].
pub fn layer_setup() -> Option<&'static LayerSetup> {
    if DETACHED.load(Ordering::Acquire) {
        None
    } else {
        SETUP.get()
    }
}

/// Detaches the intercepts from the global setup and forgets every fake address.
pub fn teardown_setup() {
    DETACHED.store(true, Ordering::Release);

    if let Some(setup) = SETUP.get() {
        setup.fake_ips.clear();
        tracing::info!("layer torn down");
    }
}
