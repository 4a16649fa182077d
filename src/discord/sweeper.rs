use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use serenity::prelude::*;
use tokio::time::{interval, MissedTickBehavior};

use crate::{
    discord::messages::{announce_reminder, announce_results, refresh_leaderboard},
    helpers::*,
    tournaments::{due_reminders, expire_tournaments},
};

/// Periodic job closing expired tournaments and sending end reminders. Only
/// the first `start` spawns the loop, later `ready` events are ignored.
#[derive(Debug)]
pub struct Sweeper {
    started: AtomicBool,
    period: Duration,
    reminder_days: i64,
}

impl Sweeper {
    pub fn new(period_secs: u64, reminder_days: i64) -> Self {
        Sweeper {
            started: AtomicBool::new(false),
            period: Duration::from_secs(period_secs),
            reminder_days,
        }
    }

    pub fn try_claim(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn start(self: Arc<Self>, ctx: Context) {
        if !self.try_claim() {
            debug!("Sweeper already running");
            return;
        }
        info!("Starting sweeper, every {}s", self.period.as_secs());
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep(&ctx).await;
            }
        });
    }

    async fn sweep(&self, ctx: &Context) {
        let (db, config) = match (get_database(ctx).await, get_config(ctx).await) {
            (Ok(db), Ok(config)) => (db, config),
            (Err(e), _) | (_, Err(e)) => {
                error!("Sweeper cannot run: {:?}", e);
                return;
            }
        };
        let image_base = config.course_image_base_url.as_deref();
        let now = Utc::now().naive_utc();

        match with_db(db.clone(), move |db| expire_tournaments(db, now)).await {
            Ok(finished) => {
                for f in finished.iter() {
                    refresh_leaderboard(ctx, f.tournament.tournament.tournament_id).await;
                    announce_results(ctx, f, image_base).await;
                }
            }
            Err(e) => error!("Error expiring tournaments: {:?}", e),
        }

        let days = self.reminder_days;
        match with_db(db, move |db| due_reminders(db, now, days)).await {
            Ok(due) => {
                for details in due.iter() {
                    info!(
                        "Reminding tournament {} on server {}",
                        details.tournament.tournament_id, details.tournament.server_id
                    );
                    announce_reminder(ctx, details, image_base).await;
                }
            }
            Err(e) => error!("Error sending tournament reminders: {:?}", e),
        }
    }
}
