use tokio::time::Instant;

use super::Session;
use crate::timer::Timer;
use crate::transport::Outbound;

/// One packet in flight. The packet is resent each time its timer expires
/// and the next one is only sent after its ACK.
pub(super) async fn drive<O: Outbound>(session: &mut Session<O>) {
    for index in 0..session.len() {
        session.send(index).await;
        let mut timer = Timer::start(index as u16, session.timeout());

        while !session.is_acked(index) {
            session.wait(timer.deadline()).await;
            if session.is_acked(index) {
                break;
            }
            if timer.is_expired(Instant::now()) {
                session.send(index).await;
                timer = Timer::start(index as u16, session.timeout());
            }
        }
    }
}
