use std::{sync::Arc, time::Duration};

use crate::{
    model::WireClock,
    rooms::RoomRouter,
    store::{MessageStore, PresenceRegistry, SqliteStore, UserDirectory},
};

#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub outbox_capacity: usize,
    pub close_timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            outbox_capacity: 256,
            close_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Clone)]
pub struct Hub {
    pub messages: Arc<dyn MessageStore>,
    pub presence: Arc<dyn PresenceRegistry>,
    pub users: Arc<dyn UserDirectory>,
    pub router: Arc<dyn RoomRouter>,
    pub clock: WireClock,
    pub limits: SessionLimits,
}

impl Hub {
    pub fn new(store: SqliteStore, router: Arc<dyn RoomRouter>) -> Self {
        let store = Arc::new(store);
        Self {
            messages: store.clone(),
            presence: store.clone(),
            users: store,
            router,
            clock: WireClock::default(),
            limits: SessionLimits::default(),
        }
    }

    pub fn with_clock(mut self, clock: WireClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }
}
