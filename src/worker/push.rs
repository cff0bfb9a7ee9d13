//! Push notifications. A thin pass-through with no retry or delivery guarantee.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::OfflineWorker;
use crate::cache::CacheStorage;
use crate::net::Network;

/// Push message body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
  pub title: String,
  pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
  pub date_of_arrival: DateTime<Utc>,
  pub primary_key: u64,
}

/// A system notification as handed to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
}

/// Platform notification display.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;

  fn close(&self, notification: &Notification) -> Result<()>;
}

/// Opens or focuses a page.
pub trait WindowOpener: Send + Sync {
  fn open_window(&self, url: &Url) -> Result<()>;
}

/// Notifier and window opener for headless runs; everything goes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(
      title = %notification.title,
      body = %notification.body,
      icon = %notification.icon,
      "Showing notification"
    );
    Ok(())
  }

  fn close(&self, notification: &Notification) -> Result<()> {
    info!(title = %notification.title, "Closing notification");
    Ok(())
  }
}

impl WindowOpener for LogNotifier {
  fn open_window(&self, url: &Url) -> Result<()> {
    info!(url = %url, "Opening window");
    Ok(())
  }
}

impl<S: CacheStorage, N: Network> OfflineWorker<S, N> {
  /// Show a notification for a push message.
  ///
  /// A missing or malformed payload is ignored and yields `None`.
  pub fn handle_push(
    &self,
    data: Option<&[u8]>,
    notifier: &impl Notifier,
  ) -> Result<Option<Notification>> {
    let Some(data) = data else {
      return Ok(None);
    };
    let payload: PushPayload = match serde_json::from_slice(data) {
      Ok(payload) => payload,
      Err(e) => {
        debug!("Ignoring malformed push payload: {}", e);
        return Ok(None);
      }
    };

    let notification = Notification {
      title: payload.title,
      body: payload.body,
      icon: self.notifications.icon.clone(),
      badge: self.notifications.badge.clone(),
      vibrate: self.notifications.vibrate.clone(),
      data: NotificationData {
        date_of_arrival: Utc::now(),
        primary_key: 1,
      },
    };
    notifier.show(&notification)?;

    Ok(Some(notification))
  }

  /// Close the clicked notification and bring up the root page.
  pub fn handle_notification_click(
    &self,
    notification: &Notification,
    notifier: &impl Notifier,
    opener: &impl WindowOpener,
  ) -> Result<Url> {
    notifier.close(notification)?;
    opener.open_window(&self.notification_url)?;
    Ok(self.notification_url.clone())
  }
}
