mod live;
mod replay;

pub use live::{
    close_watchdog, monitor_status, monitoring_notification, read_feed, run_engine, run_live_feed, EngineEvent,
    FEED_ACTIVE_WINDOW_SECS, FEED_CHANNEL_CAPACITY,
};
pub use replay::{load_ticks_csv, read_ticks_csv, run_replay, SessionReport};
