// ABOUTME: Periodic broadcaster that emits time/date/DST synchronisation
// ABOUTME: frames onto the bus around minute boundaries, the configured daily
// ABOUTME: sync time, and the local timezone's next DST transition

use crate::events::{BridgeSenders, NtpEmit};
use crate::packet::Frame;
use crate::settings::NtpSettings;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Offset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const NTP_ADDRESS: u8 = 0x00;
const TIME_COMMAND: u8 = 0xD8;
const DATE_COMMAND: u8 = 0xB7;
const DST_COMMAND: u8 = 0xAF;

/// How far ahead to scan for a DST transition before giving up.
const DST_SCAN_HORIZON_DAYS: i64 = 400;

/// Periodically injects time synchronisation frames onto the bus via the
/// Bridge's send path. Never touches the serial transport directly.
pub struct NtpBroadcaster {
    settings: NtpSettings,
    senders: BridgeSenders,
    zone: Tz,
    running: AtomicBool,
    stop_requested: AtomicBool,
    wake: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NtpBroadcaster {
    pub fn new(settings: NtpSettings, senders: BridgeSenders) -> Self {
        let zone = local_zone();
        NtpBroadcaster {
            settings,
            senders,
            zone,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            wake: Notify::new(),
            task: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the broadcast loop if NTP is enabled in settings. A no-op if
    /// disabled, or if already running.
    pub fn start(self: &Arc<Self>) {
        if !self.settings.enabled {
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.task.lock().expect("ntp task mutex poisoned") = Some(handle);
    }

    pub async fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();

        let handle = self.task.lock().expect("ntp task mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run(&self) {
        info!("started NTP broadcast, waiting for next minute boundary");

        loop {
            if !self.sleep_until(next_minute_boundary(Utc::now())).await {
                break;
            }

            let now = Utc::now().with_timezone(&self.zone);
            self.broadcast(now);

            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            let until = self.next_wakeup(now);
            info!(wakeup = %until, "waiting for next NTP broadcast");
            if !self.sleep_until(until - ChronoDuration::minutes(1)).await {
                break;
            }
        }
    }

    fn broadcast(&self, now: DateTime<Tz>) {
        info!(%now, "broadcasting NTP");
        let _ = self.senders.ntp_emit.send(NtpEmit(time_frame(&now)));
        let _ = self.senders.ntp_emit.send(NtpEmit(date_frame(&now)));
        let _ = self.senders.ntp_emit.send(NtpEmit(dst_frame()));
    }

    /// The minimum of the next configured sync-time and the next DST
    /// transition, falling back to +1h if neither applies.
    fn next_wakeup(&self, now: DateTime<Tz>) -> DateTime<Utc> {
        let now_utc = now.with_timezone(&Utc);
        let until_dst = next_dst_transition(&self.zone, now_utc);

        let until_sync = match self.settings.parsed_synctime() {
            Some((hh, mm)) => Some(next_local_time(&self.zone, now, hh, mm)),
            None => None,
        };

        match (until_sync, until_dst) {
            (Some(sync), Some(dst)) => sync.min(dst),
            (Some(sync), None) => sync,
            (None, Some(dst)) => dst,
            (None, None) => now_utc + ChronoDuration::hours(1),
        }
    }

    /// Sleeps until `until` (UTC), waking early if `stop()` is called.
    /// Returns `false` if interrupted by a stop request.
    async fn sleep_until(&self, until: DateTime<Utc>) -> bool {
        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                return false;
            }
            let now = Utc::now();
            if now >= until {
                return !self.stop_requested.load(Ordering::SeqCst);
            }
            let remaining = (until - now).to_std().unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(remaining) => {}
                _ = self.wake.notified() => {}
            }
        }
    }
}

fn next_minute_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = now
        .with_second(0)
        .and_then(|dt| dt.with_nanosecond(0))
        .unwrap_or(now);
    truncated + ChronoDuration::minutes(1)
}

/// The next future instant, in UTC, at which the local wall clock reads
/// `hh:mm`, rolling to tomorrow if today's has already passed.
fn next_local_time(zone: &Tz, now: DateTime<Tz>, hh: u32, mm: u32) -> DateTime<Utc> {
    let candidate = now
        .date_naive()
        .and_hms_opt(hh, mm, 0)
        .and_then(|naive| zone.from_local_datetime(&naive).earliest())
        .unwrap_or(now);

    let candidate = if candidate <= now {
        candidate + ChronoDuration::days(1)
    } else {
        candidate
    };
    candidate.with_timezone(&Utc)
}

/// Finds the next UTC instant after `after` at which `zone`'s fixed offset
/// changes, by scanning day-by-day and then refining to the minute. Returns
/// `None` for zones with no DST (e.g. UTC, or most of the year-round
/// tropics) within the scan horizon.
fn next_dst_transition(zone: &Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let base_offset = offset_seconds(zone, after);

    let mut day_cursor = after;
    let mut found_day = None;
    for _ in 0..DST_SCAN_HORIZON_DAYS {
        day_cursor += ChronoDuration::days(1);
        if offset_seconds(zone, day_cursor) != base_offset {
            found_day = Some(day_cursor);
            break;
        }
    }
    let found_day = found_day?;

    // Binary search within the bracketing day for the exact transition
    // minute.
    let mut lo = found_day - ChronoDuration::days(1);
    let mut hi = found_day;
    while (hi - lo) > ChronoDuration::minutes(1) {
        let mid = lo + (hi - lo) / 2;
        if offset_seconds(zone, mid) == base_offset {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Some(hi)
}

fn offset_seconds(zone: &Tz, at: DateTime<Utc>) -> i32 {
    zone.offset_from_utc_datetime(&at.naive_utc()).fix().local_minus_utc()
}

/// Resolves the OS-configured IANA timezone, falling back to UTC (and a
/// one-time warning) if it can't be determined or isn't recognised.
fn local_zone() -> Tz {
    match iana_time_zone::get_timezone() {
        Ok(name) => match name.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!(zone = %name, "unrecognised local timezone, NTP DST tracking disabled");
                Tz::UTC
            }
        },
        Err(err) => {
            warn!(%err, "couldn't resolve local timezone, NTP DST tracking disabled");
            Tz::UTC
        }
    }
}

fn time_frame(now: &DateTime<Tz>) -> Frame {
    let body = [
        TIME_COMMAND,
        now.weekday().num_days_from_monday() as u8,
        now.hour() as u8,
        now.minute() as u8,
    ];
    Frame::build(0xFB, NTP_ADDRESS, &body)
}

fn date_frame(now: &DateTime<Tz>) -> Frame {
    let year = (now.year() as u16).to_be_bytes();
    let body = [DATE_COMMAND, now.day() as u8, now.month() as u8, year[0], year[1]];
    Frame::build(0xFB, NTP_ADDRESS, &body)
}

fn dst_frame() -> Frame {
    Frame::build(0xFB, NTP_ADDRESS, &[DST_COMMAND, 0x00])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_frame_has_expected_shape() {
        let now = Tz::UTC.with_ymd_and_hms(2026, 7, 26, 14, 5, 0).unwrap();
        let frame = time_frame(&now);
        assert_eq!(frame.as_bytes()[0], crate::packet::STX);
        assert_eq!(frame.body()[0], TIME_COMMAND);
        assert_eq!(frame.body()[2], 14);
        assert_eq!(frame.body()[3], 5);
    }

    #[test]
    fn date_frame_encodes_year_big_endian() {
        let now = Tz::UTC.with_ymd_and_hms(2026, 7, 26, 0, 0, 0).unwrap();
        let frame = date_frame(&now);
        assert_eq!(frame.body(), &[DATE_COMMAND, 26, 7, 0x07, 0xEA]);
    }

    #[test]
    fn dst_frame_is_fixed_shape() {
        let frame = dst_frame();
        assert_eq!(frame.body(), &[DST_COMMAND, 0x00]);
    }

    #[test]
    fn utc_zone_has_no_dst_transition() {
        let now = Utc::now();
        assert!(next_dst_transition(&Tz::UTC, now).is_none());
    }

    #[test]
    fn next_local_time_rolls_to_tomorrow_when_already_passed() {
        let now = Tz::UTC.with_ymd_and_hms(2026, 7, 26, 23, 0, 0).unwrap();
        let next = next_local_time(&Tz::UTC, now, 8, 0);
        assert_eq!(next.date_naive(), chrono::NaiveDate::from_ymd_opt(2026, 7, 27).unwrap());
    }
}
