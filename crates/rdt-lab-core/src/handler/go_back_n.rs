use std::collections::BTreeSet;

use tokio::time::Instant;
use tracing::debug;

use super::Session;
use crate::timer::Timer;
use crate::transport::Outbound;

/// Windows of `W` packets under one shared timer. ACKs are tracked per
/// packet. When the timer expires every packet from the lowest
/// unacknowledged one up to `W` past it is sent again, acknowledged or not,
/// and the window limit moves to match.
pub(super) async fn drive<O: Outbound>(session: &mut Session<O>) {
    let total = session.len();
    let mut base = 0;

    while base < total {
        let mut limit = (base + session.window()).min(total);
        debug!(base, limit, last_window = limit == total, "go-back-n window");

        for index in base..limit {
            session.send(index).await;
        }
        let mut in_flight: BTreeSet<usize> = (base..limit).collect();
        let mut timer = Timer::start(base as u16, session.timeout());

        loop {
            in_flight.retain(|&index| !session.is_acked(index));
            let Some(&low) = in_flight.first() else {
                break;
            };

            if timer.is_expired(Instant::now()) {
                let resend_limit = (low + session.window()).min(total);
                debug!(low, resend_limit, "go-back-n timeout");
                for index in low..resend_limit {
                    session.send(index).await;
                    if index >= limit && !session.is_acked(index) {
                        in_flight.insert(index);
                    }
                }
                limit = limit.max(resend_limit);
                timer = Timer::start(low as u16, session.timeout());
                continue;
            }

            session.wait(timer.deadline()).await;
        }

        base = limit;
    }
}
