use crate::config::Config;
use crate::db::MongoDB;
use crate::events::EventHub;
use crate::push::PushClient;
use actix::Addr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub event_hub: Addr<EventHub>,
    pub mongodb: Arc<MongoDB>,
    pub push: PushClient,
    pub config: Config,
}
