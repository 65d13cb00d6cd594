use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use tokio::sync::oneshot;

/// What should we do when the user stops
/// this program?
///
/// The first SIGINT/SIGTERM asks the event loop to stop, a second one exits
/// right away.
pub fn handle_shutdown() -> std::io::Result<oneshot::Receiver<()>> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let (tx, rx) = oneshot::channel();

    std::thread::spawn(move || {
        let mut tx = Some(tx);
        for signal in signals.forever() {
            let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);
            match tx.take() {
                Some(tx) => {
                    log::warn!("Received signal {signal}, stopping");
                    let _ = tx.send(());
                }
                None => {
                    log::warn!("Received signal {signal} again, exiting now");
                    std::process::exit(1);
                }
            }
        }
    });

    Ok(rx)
}
