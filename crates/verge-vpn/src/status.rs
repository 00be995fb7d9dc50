//! Status Presenter
//!
//! Projects tunnel state onto the two external surfaces: the persistent
//! status notification and the quick-settings tile. Both surfaces have a
//! stable identity and are updated in place.

use crate::engine::TrafficSnapshot;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Identity of the single status notification
pub const NOTIFICATION_ID: u32 = 1;

/// Notification channel
pub const NOTIFICATION_CHANNEL: &str = "clash_vpn_channel";

/// What the surfaces should show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusView {
    pub connected: bool,
    /// Bytes per second
    pub upload_rate: u64,
    /// Bytes per second
    pub download_rate: u64,
}

impl StatusView {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn connected(traffic: TrafficSnapshot) -> Self {
        Self {
            connected: true,
            upload_rate: traffic.up,
            download_rate: traffic.down,
        }
    }
}

/// User affordances on the notification and tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusAction {
    OpenApp,
    Connect,
    Disconnect,
}

impl StatusAction {
    pub fn label(&self) -> &'static str {
        match self {
            StatusAction::OpenApp => "Open",
            StatusAction::Connect => "Connect",
            StatusAction::Disconnect => "Disconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub id: u32,
    pub channel: &'static str,
    pub title: String,
    pub text: String,
    pub actions: Vec<StatusAction>,
    /// Not dismissable by the user
    pub ongoing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileContent {
    pub state: TileState,
    pub label: String,
    pub subtitle: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedStatus {
    pub notification: NotificationContent,
    pub tile: TileContent,
}

/// Host surfaces. Implementations update the identity they are given in
/// place rather than posting a new entry.
pub trait StatusSink: Send + Sync {
    fn show_notification(&self, notification: &NotificationContent);
    fn update_tile(&self, tile: &TileContent);
}

/// Format a byte rate with binary units.
pub fn format_rate(bytes_per_sec: u64) -> String {
    const UNITS: [&str; 5] = ["B/s", "KB/s", "MB/s", "GB/s", "TB/s"];

    if bytes_per_sec < 1024 {
        return format!("{} B/s", bytes_per_sec);
    }

    let mut value = bytes_per_sec as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Renders and publishes status to a [`StatusSink`].
pub struct StatusPresenter {
    sink: Arc<dyn StatusSink>,
    /// Last view pushed to the sink; the lock also serializes sink writes
    last: Mutex<Option<StatusView>>,
}

impl StatusPresenter {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self {
            sink,
            last: Mutex::new(None),
        }
    }

    /// Pure projection of a view onto both surfaces.
    pub fn render(view: &StatusView) -> RenderedStatus {
        let notification = if view.connected {
            NotificationContent {
                id: NOTIFICATION_ID,
                channel: NOTIFICATION_CHANNEL,
                title: "Clash VPN connected".to_string(),
                text: format!(
                    "↑ {}  ↓ {}",
                    format_rate(view.upload_rate),
                    format_rate(view.download_rate)
                ),
                actions: vec![StatusAction::Disconnect],
                ongoing: true,
            }
        } else {
            NotificationContent {
                id: NOTIFICATION_ID,
                channel: NOTIFICATION_CHANNEL,
                title: "Clash VPN disconnected".to_string(),
                text: "Tap to start VPN".to_string(),
                actions: vec![StatusAction::OpenApp, StatusAction::Connect],
                ongoing: false,
            }
        };

        let tile = if view.connected {
            TileContent {
                state: TileState::Active,
                label: "Clash VPN connected".to_string(),
                subtitle: "Tap to disconnect".to_string(),
            }
        } else {
            TileContent {
                state: TileState::Inactive,
                label: "Clash VPN".to_string(),
                subtitle: "Tap to connect".to_string(),
            }
        };

        RenderedStatus { notification, tile }
    }

    /// Push `view` to the sink. Returns false when it equals the view
    /// already shown, in which case the sink is not touched.
    pub fn present(&self, view: StatusView) -> bool {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if *last == Some(view) {
            return false;
        }

        let rendered = Self::render(&view);
        self.sink.show_notification(&rendered.notification);
        self.sink.update_tile(&rendered.tile);
        *last = Some(view);

        debug!("Status presented (connected: {})", view.connected);
        true
    }

    /// Last view pushed to the sink
    pub fn current(&self) -> Option<StatusView> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingSink;
    use std::thread;

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(0), "0 B/s");
        assert_eq!(format_rate(1023), "1023 B/s");
        assert_eq!(format_rate(1536), "1.50 KB/s");
        assert_eq!(format_rate(5 * 1024 * 1024), "5.00 MB/s");
        assert_eq!(format_rate(3 * 1024 * 1024 * 1024), "3.00 GB/s");
        assert_eq!(format_rate(2048 * 1024 * 1024 * 1024 * 1024), "2048.00 TB/s");
    }

    #[test]
    fn test_render_connected() {
        let view = StatusView::connected(TrafficSnapshot { up: 2048, down: 512 });
        let rendered = StatusPresenter::render(&view);

        assert_eq!(rendered.notification.id, NOTIFICATION_ID);
        assert_eq!(rendered.notification.text, "↑ 2.00 KB/s  ↓ 512 B/s");
        assert_eq!(rendered.notification.actions, vec![StatusAction::Disconnect]);
        assert!(rendered.notification.ongoing);
        assert_eq!(rendered.tile.state, TileState::Active);
        assert_eq!(rendered.tile.subtitle, "Tap to disconnect");
    }

    #[test]
    fn test_render_disconnected() {
        let rendered = StatusPresenter::render(&StatusView::disconnected());

        assert_eq!(rendered.notification.id, NOTIFICATION_ID);
        assert_eq!(
            rendered.notification.actions,
            vec![StatusAction::OpenApp, StatusAction::Connect]
        );
        assert_eq!(rendered.tile.state, TileState::Inactive);
        assert_eq!(rendered.tile.label, "Clash VPN");
    }

    #[test]
    fn test_present_is_idempotent() {
        let sink = Arc::new(RecordingSink::default());
        let presenter = StatusPresenter::new(sink.clone());
        let view = StatusView::connected(TrafficSnapshot::default());

        assert!(presenter.present(view));
        assert!(!presenter.present(view));
        assert!(!presenter.present(view));
        assert_eq!(sink.notifications().len(), 1);
        assert_eq!(sink.tile_updates(), 1);

        assert!(presenter.present(StatusView::disconnected()));
        assert_eq!(sink.notifications().len(), 2);
        assert_eq!(presenter.current(), Some(StatusView::disconnected()));
    }

    #[test]
    fn test_present_from_many_threads() {
        let sink = Arc::new(RecordingSink::default());
        let presenter = Arc::new(StatusPresenter::new(sink.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let presenter = presenter.clone();
                thread::spawn(move || presenter.present(StatusView::disconnected()))
            })
            .collect();
        let updated = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|updated| *updated)
            .count();

        assert_eq!(updated, 1);
        assert_eq!(sink.notifications().len(), 1);
    }
}
