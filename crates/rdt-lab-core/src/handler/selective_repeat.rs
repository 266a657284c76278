use tokio::time::Instant;
use tracing::debug;

use super::Session;
use crate::timer::TimerSet;
use crate::transport::Outbound;

/// Block windows of `W` packets, each with its own timer. An ACK cancels
/// its packet's timer; an expired timer resends only that packet. The next
/// window starts once nothing in the current one is outstanding.
pub(super) async fn drive<O: Outbound>(session: &mut Session<O>) {
    let total = session.len();
    let mut timers = TimerSet::new();
    let mut base = 0;

    while base < total {
        let limit = (base + session.window()).min(total);
        let last_window = limit == total;
        debug!(base, limit, last_window, "selective-repeat window");

        for index in base..limit {
            session.send(index).await;
            timers.start(index as u16, session.timeout());
        }

        loop {
            timers.retain(|seq| !session.is_acked(usize::from(seq)));
            if timers.is_empty() {
                break;
            }

            for seq in timers.take_expired(Instant::now()) {
                session.send(usize::from(seq)).await;
                timers.start(seq, session.timeout());
            }

            if let Some(deadline) = timers.next_deadline() {
                session.wait(deadline).await;
            }
        }

        base = limit;
    }
}
