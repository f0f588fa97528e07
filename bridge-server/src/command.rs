//! The command channel.
//!
//! Raw autopilot commands arrive from any connection on either transport.
//! This task is the single serialization point: it validates, rate-limits,
//! answers ACK/NAK to the originating connection and forwards accepted
//! commands to the engine task. Command application order is arrival order
//! into this channel.

use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;

use bridge_core::autopilot::TokenBucket;
use bridge_core::command::{
    validate, BridgeCommand, CommandParseError, CommandReply, NakReason,
};

use crate::engine::EngineCommand;
use crate::server::ProtocolKind;
use crate::BridgeError;

/// A raw command handed over by a protocol server's read task.
pub struct IncomingCommand {
    pub conn_id: u64,
    pub protocol: ProtocolKind,
    /// Parse outcome; parse failures still get a NAK response.
    pub frame: Result<BridgeCommand, CommandParseError>,
    /// Reply queue of the originating connection. Best-effort: a headless
    /// client that never drains it loses ACKs, not commands.
    pub reply: mpsc::Sender<CommandReply>,
}

/// Decide a command's fate: the reply to send and whether to forward it.
///
/// Emergency disengage bypasses the rate limiter - disengagement must never
/// be throttled.
pub fn decide(
    bucket: &mut TokenBucket,
    frame: &Result<BridgeCommand, CommandParseError>,
    now_ms: u64,
) -> (CommandReply, Option<BridgeCommand>) {
    let command = match frame {
        Ok(command) => *command,
        Err(e) => {
            return (
                CommandReply::Nak {
                    reason: e.nak_reason(),
                },
                None,
            )
        }
    };
    if let Err(reason) = validate(&command) {
        return (CommandReply::Nak { reason }, None);
    }
    if command.is_emergency() {
        return (CommandReply::Ack, Some(command));
    }
    if bucket.try_take(now_ms) {
        (CommandReply::Ack, Some(command))
    } else {
        (
            CommandReply::Nak {
                reason: NakReason::RateLimited,
            },
            None,
        )
    }
}

/// The command channel subsystem.
pub struct CommandChannel {
    rx: mpsc::Receiver<IncomingCommand>,
    engine_tx: mpsc::Sender<EngineCommand>,
    bucket: TokenBucket,
    started: Instant,
}

impl CommandChannel {
    pub fn new(
        rx: mpsc::Receiver<IncomingCommand>,
        engine_tx: mpsc::Sender<EngineCommand>,
    ) -> Self {
        Self {
            rx,
            engine_tx,
            bucket: TokenBucket::default(),
            started: Instant::now(),
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> Result<(), BridgeError> {
        loop {
            tokio::select! { biased;
                _ = subsys.on_shutdown_requested() => break,
                incoming = self.rx.recv() => {
                    match incoming {
                        Some(incoming) => self.handle(incoming).await,
                        None => break,
                    }
                },
            }
        }
        Ok(())
    }

    async fn handle(&mut self, incoming: IncomingCommand) {
        let now_ms = self.started.elapsed().as_millis() as u64;
        let (reply, forward) = decide(&mut self.bucket, &incoming.frame, now_ms);

        match &reply {
            CommandReply::Ack => debug!(
                "Command from {} connection {} accepted",
                incoming.protocol, incoming.conn_id
            ),
            CommandReply::Nak { reason } => info!(
                "Command from {} connection {} NAKed: {}",
                incoming.protocol,
                incoming.conn_id,
                reason.as_str()
            ),
        }

        // ACK emission is best-effort (headless simulator mode): a full or
        // closed reply queue must not hold up command processing
        if incoming.reply.try_send(reply).is_err() {
            debug!(
                "No acknowledgment consumer on connection {}",
                incoming.conn_id
            );
        }

        if let Some(command) = forward {
            if self
                .engine_tx
                .send(EngineCommand::Autopilot(command))
                .await
                .is_err()
            {
                warn!("Engine unreachable, dropping accepted command");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::autopilot::AutopilotMode;

    fn engage() -> Result<BridgeCommand, CommandParseError> {
        Ok(BridgeCommand::Engage {
            mode: AutopilotMode::Auto,
            heading: 90.0,
        })
    }

    #[test]
    fn five_commands_in_a_second_yield_one_ack_four_rate_naks() {
        let mut bucket = TokenBucket::default();
        let mut acks = 0;
        let mut rate_naks = 0;
        for i in 0..5u64 {
            match decide(&mut bucket, &engage(), 1000 + i * 200).0 {
                CommandReply::Ack => acks += 1,
                CommandReply::Nak {
                    reason: NakReason::RateLimited,
                } => rate_naks += 1,
                other => panic!("unexpected reply {:?}", other),
            }
        }
        assert_eq!(acks, 1);
        assert_eq!(rate_naks, 4);
    }

    #[test]
    fn disengage_bypasses_rate_limit() {
        let mut bucket = TokenBucket::default();
        // Exhaust the bucket
        assert!(matches!(
            decide(&mut bucket, &engage(), 0).0,
            CommandReply::Ack
        ));
        assert!(matches!(
            decide(&mut bucket, &engage(), 100).0,
            CommandReply::Nak { .. }
        ));
        // Disengage still goes through, immediately
        let (reply, forward) = decide(&mut bucket, &Ok(BridgeCommand::Disengage), 200);
        assert!(matches!(reply, CommandReply::Ack));
        assert_eq!(forward, Some(BridgeCommand::Disengage));
    }

    #[test]
    fn invalid_heading_naks_without_consuming_a_token() {
        let mut bucket = TokenBucket::default();
        let bad = Ok(BridgeCommand::SetHeading { heading: 400.0 });
        let (reply, forward) = decide(&mut bucket, &bad, 0);
        assert!(matches!(
            reply,
            CommandReply::Nak {
                reason: NakReason::HeadingRange
            }
        ));
        assert!(forward.is_none());
        // The token is still there for a valid command
        assert!(matches!(decide(&mut bucket, &engage(), 1).0, CommandReply::Ack));
    }

    #[test]
    fn parse_errors_nak_with_their_reason() {
        let mut bucket = TokenBucket::default();
        let (reply, forward) = decide(
            &mut bucket,
            &Err(CommandParseError::Version(9)),
            0,
        );
        assert!(matches!(
            reply,
            CommandReply::Nak {
                reason: NakReason::Version
            }
        ));
        assert!(forward.is_none());
    }
}
