//! Notification system - Tells logged-in users about updates and reboots
//!
//! Supports:
//! - GUI notifications (notify-send for desktop sessions)
//! - Terminal broadcasts (wall for TTY/SSH users), for imminent reboots

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use std::process::Command;
use std::sync::Mutex;
use tracing::{info, warn};

/// Notification urgency level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationUrgency {
    Normal,
    Critical,
}

/// User-facing notices raised by the agent.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn updates_available(&self, count: usize);

    async fn reboot_scheduled(&self, at: DateTime<Utc>);

    /// Final warning before a reboot.
    async fn reboot_imminent(&self, minutes: u64);
}

/// Sends notices to desktop sessions and terminals.
pub struct DesktopNotifier {
    app_name: String,
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    fn send(&self, title: &str, message: &str, urgency: NotificationUrgency) {
        self.send_gui_notification(title, message, urgency);

        if urgency == NotificationUrgency::Critical {
            send_terminal_broadcast(title, message);
        }
    }

    fn send_gui_notification(&self, title: &str, message: &str, urgency: NotificationUrgency) {
        let has_notify_send = Command::new("which")
            .arg("notify-send")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);

        if !has_notify_send {
            return;
        }

        let urgency_str = match urgency {
            NotificationUrgency::Normal => "normal",
            NotificationUrgency::Critical => "critical",
        };

        let sessions = match active_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Could not list sessions: {}", e);
                return;
            }
        };

        for session in sessions {
            let bus = format!("DBUS_SESSION_BUS_ADDRESS=unix:path=/run/user/{}/bus", session.uid);
            let result = Command::new("sudo")
                .args([
                    "-u",
                    &session.username,
                    "DISPLAY=:0",
                    &bus,
                    "notify-send",
                    "--urgency",
                    urgency_str,
                    "--app-name",
                    &self.app_name,
                    title,
                    message,
                ])
                .output();

            match result {
                Ok(output) if output.status.success() => {
                    info!("Notification sent to {}", session.username);
                }
                Ok(_) => warn!("Failed to notify {}", session.username),
                Err(e) => warn!("Error sending notification: {}", e),
            }
        }
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn updates_available(&self, count: usize) {
        let message = if count == 1 {
            "1 update is available and will be installed automatically.".to_string()
        } else {
            format!("{} updates are available and will be installed automatically.", count)
        };
        self.send("Updates available", &message, NotificationUrgency::Normal);
    }

    async fn reboot_scheduled(&self, at: DateTime<Utc>) {
        let local = at.with_timezone(&Local);
        let message = format!(
            "Updates were installed. This machine will restart on {}.",
            local.format("%a %d %b %H:%M")
        );
        self.send("Restart scheduled", &message, NotificationUrgency::Normal);
    }

    async fn reboot_imminent(&self, minutes: u64) {
        let message = format!(
            "This machine will restart in {} minutes to finish installing updates. Save your work.",
            minutes
        );
        self.send("Restart imminent", &message, NotificationUrgency::Critical);
    }
}

fn send_terminal_broadcast(title: &str, message: &str) {
    let formatted = format!("\n*** {} ***\n\n{}\n", title, message);

    match Command::new("wall").arg(&formatted).output() {
        Ok(output) if output.status.success() => info!("Terminal broadcast sent"),
        Ok(_) => warn!("Failed to send terminal broadcast"),
        Err(e) => warn!("Error sending terminal broadcast: {}", e),
    }
}

#[derive(Debug)]
struct UserSession {
    username: String,
    uid: u32,
}

/// Active user sessions from loginctl
fn active_sessions() -> Result<Vec<UserSession>, std::io::Error> {
    let output = Command::new("loginctl")
        .args(["list-sessions", "--no-legend"])
        .output()?;

    let mut sessions = Vec::new();
    if !output.status.success() {
        return Ok(sessions);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 {
            continue;
        }
        let Ok(uid) = parts[1].parse::<u32>() else {
            continue;
        };
        sessions.push(UserSession {
            username: parts[2].to_string(),
            uid,
        });
    }

    Ok(sessions)
}

// ============================================================================
// Recording Notifier (tests)
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    UpdatesAvailable(usize),
    RebootScheduled(DateTime<Utc>),
    RebootImminent(u64),
}

/// Keeps every notice in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }

    fn push(&self, notice: Notice) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(notice);
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn updates_available(&self, count: usize) {
        self.push(Notice::UpdatesAvailable(count));
    }

    async fn reboot_scheduled(&self, at: DateTime<Utc>) {
        self.push(Notice::RebootScheduled(at));
    }

    async fn reboot_imminent(&self, minutes: u64) {
        self.push(Notice::RebootImminent(minutes));
    }
}
