//! `thingwatch run`: one polling session per profile, events to stdout.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use thingwatch_config::Config;
use thingwatch_core::{BroadcastGateway, CycleOutcome, GatewayEvent, Session};

use crate::cli::{GlobalOpts, RunArgs};
use crate::config::session_config;
use crate::error::CliError;
use crate::output::{event_line, print_output};

type Events = broadcast::Receiver<Arc<GatewayEvent>>;

struct Prepared {
    profile: String,
    session: Session,
    events: Events,
}

pub async fn handle(args: RunArgs, cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let mut requested: Vec<Option<String>> = Vec::new();
    for p in args.profiles {
        if !requested.iter().flatten().any(|seen| *seen == p) {
            requested.push(Some(p));
        }
    }
    if requested.is_empty() {
        requested.push(None);
    }

    let mut prepared = Vec::with_capacity(requested.len());
    for name in requested {
        let (profile, config) = session_config(cfg, name.as_deref(), global)?;
        let gateway = Arc::new(BroadcastGateway::new());
        let events = gateway.subscribe();
        let session = Session::new(config, gateway)?;
        prepared.push(Prepared {
            profile,
            session,
            events,
        });
    }

    if args.once {
        run_once(prepared).await
    } else {
        run_until_interrupted(prepared).await
    }
}

// ── Single cycle ─────────────────────────────────────────────────────

async fn run_once(prepared: Vec<Prepared>) -> Result<(), CliError> {
    let mut first_failure = None;
    for Prepared {
        profile,
        mut session,
        mut events,
    } in prepared
    {
        let result = match session.start() {
            Ok(()) => match session.run_cycle().await {
                CycleOutcome::Failed { message, .. } => Err(CliError::CycleFailed {
                    profile: profile.clone(),
                    message,
                }),
                outcome => {
                    debug!(profile = %profile, ?outcome, "cycle finished");
                    Ok(())
                }
            },
            Err(e) => Err(CliError::from(e).for_profile(&profile)),
        };
        drop(session);
        drain(&profile, &mut events);

        if let Err(e) = result {
            error!(profile = %profile, error = %e, "single cycle failed");
            first_failure.get_or_insert(e);
        }
    }
    first_failure.map_or(Ok(()), Err)
}

/// Print everything already published. The session is gone, so the
/// channel ends with `Closed`.
fn drain(profile: &str, events: &mut Events) {
    loop {
        match events.try_recv() {
            Ok(event) => emit(profile, &event),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(profile = %profile, skipped, "output fell behind, events dropped");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

// ── Long-running ─────────────────────────────────────────────────────

async fn run_until_interrupted(prepared: Vec<Prepared>) -> Result<(), CliError> {
    let mut handles = Vec::with_capacity(prepared.len());
    let mut printers: Vec<JoinHandle<()>> = Vec::with_capacity(prepared.len());
    let mut sessions = Vec::with_capacity(prepared.len());

    for Prepared {
        profile,
        session,
        events,
    } in prepared
    {
        handles.push(session.handle());
        printers.push(tokio::spawn(print_events(profile.clone(), events)));
        info!(profile = %profile, "starting session");
        sessions.push((profile, tokio::spawn(session.run())));
    }

    let interrupt = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping sessions");
                for handle in &handles {
                    handle.stop();
                }
            }
            Err(e) => warn!(error = %e, "cannot listen for ctrl-c"),
        }
    });

    let mut first_failure = None;
    for (profile, task) in sessions {
        match task.await {
            Ok(Ok(())) => info!(profile = %profile, "session stopped"),
            Ok(Err(e)) => {
                error!(profile = %profile, error = %e, "session ended");
                first_failure.get_or_insert(CliError::from(e).for_profile(&profile));
            }
            Err(e) => {
                first_failure.get_or_insert(CliError::Internal(format!(
                    "session task for '{profile}' failed: {e}"
                )));
            }
        }
    }
    interrupt.abort();
    for printer in printers {
        let _ = printer.await;
    }
    first_failure.map_or(Ok(()), Err)
}

async fn print_events(profile: String, mut events: Events) {
    loop {
        match events.recv().await {
            Ok(event) => emit(&profile, &event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(profile = %profile, skipped, "output fell behind, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn emit(profile: &str, event: &GatewayEvent) {
    match event_line(profile, event) {
        Ok(line) => print_output(&line),
        Err(e) => warn!(event = event.name(), error = %e, "cannot encode event"),
    }
}
