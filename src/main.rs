use std::{
    error::Error,
    path::PathBuf,
    sync::mpsc::{self, Receiver},
    thread,
    time::Duration,
};

use clap::{Parser, Subcommand};
use log::{info, warn};
use roosty_reminder::{
    config::Config,
    parse_time_str,
    sink::{ChannelSink, Ring},
    NewTrigger, Scheduler, TriggerEdit, TriggerId,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// use this config file instead of the default one
    #[clap(long, global = true)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// write a default config file
    Init {
        #[clap(long, short)]
        force: bool,
    },
    #[command(flatten)]
    Reminder(ReminderCommand),
}

#[derive(Subcommand)]
enum ReminderCommand {
    /// add a reminder at HH:MM (24 hour)
    Add {
        time: String,
        /// ring once instead of every day
        #[clap(long)]
        once: bool,
        #[clap(long)]
        audio: Option<String>,
        #[clap(long, short, default_value = "")]
        message: String,
    },
    Remove {
        id: String,
    },
    /// enable or disable a reminder
    Toggle {
        id: String,
    },
    Update {
        id: String,
        #[clap(long)]
        time: Option<String>,
        #[clap(long)]
        repeat: Option<bool>,
        #[clap(long)]
        enabled: Option<bool>,
        #[clap(long, conflicts_with = "no_audio")]
        audio: Option<String>,
        /// go back to the default sound
        #[clap(long)]
        no_audio: bool,
        #[clap(long, short)]
        message: Option<String>,
    },
    List,
    /// remove every reminder
    Clear,
    /// watch the clock and ring reminders (the default)
    Run {
        /// stop after this many seconds instead of running forever
        #[clap(long = "for", value_name = "SECS")]
        duration: Option<u64>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    // initilize the logger
    simple_file_logger::init_logger!("roosty_reminder").expect("couldn't initialize logger");

    let args = Args::parse();
    let config_path = match args.config {
        Some(path) => path,
        None => Config::config_path()?,
    };

    let command = match args.command {
        Some(Command::Init { force }) => {
            if force || !config_path.exists() {
                Config::new().save(&config_path)?;
                println!("wrote {}", config_path.display());
            } else {
                println!("{} already exists, use --force to overwrite", config_path.display());
            }
            return Ok(());
        }
        Some(Command::Reminder(command)) => command,
        None => ReminderCommand::Run { duration: None },
    };

    let config = Config::load_or_default(&config_path)?;
    let scheduler = config.scheduler()?;
    for warning in scheduler.load().warnings {
        eprintln!("warning: {warning}");
    }

    match command {
        ReminderCommand::Add {
            time,
            once,
            audio,
            message,
        } => {
            // the engine would take anything, but reject typos up front
            parse_time_str(&time)?;
            let fields = NewTrigger {
                time_str: time,
                repeat_daily: !once,
                audio_file: audio,
                message,
            };
            println!("{}", scheduler.add(fields));
        }
        ReminderCommand::Remove { id } => {
            if !scheduler.remove(&TriggerId::from(id.as_str())) {
                return Err(format!("no reminder with id {id}").into());
            }
        }
        ReminderCommand::Toggle { id } => {
            let enabled = scheduler.toggle(&TriggerId::from(id))?;
            println!("{}", if enabled { "enabled" } else { "disabled" });
        }
        ReminderCommand::Update {
            id,
            time,
            repeat,
            enabled,
            audio,
            no_audio,
            message,
        } => {
            if let Some(time) = &time {
                parse_time_str(time)?;
            }
            let mut edits: Vec<TriggerEdit> = [
                time.map(TriggerEdit::Time),
                repeat.map(TriggerEdit::Repeat),
                enabled.map(TriggerEdit::Enabled),
                audio.map(|audio| TriggerEdit::Audio(Some(audio))),
                message.map(TriggerEdit::Message),
            ]
            .into_iter()
            .flatten()
            .collect();
            if no_audio {
                edits.push(TriggerEdit::Audio(None));
            }
            scheduler.update(&TriggerId::from(id), edits)?;
        }
        ReminderCommand::List => {
            for trigger in scheduler.list_by_time() {
                println!(
                    "{}  {}  {}",
                    trigger.id(),
                    trigger.time_of_day().format(&config.time_format),
                    trigger
                );
            }
        }
        ReminderCommand::Clear => {
            println!("removed {} reminders", scheduler.clear());
        }
        ReminderCommand::Run { duration } => {
            run(&config, &scheduler, duration.map(Duration::from_secs))?;
        }
    }
    Ok(())
}

/// Runs the scheduler, printing each reminder as it rings, until `duration`
/// is up or the user hits ctrl-c.
fn run(
    config: &Config,
    scheduler: &Scheduler,
    duration: Option<Duration>,
) -> Result<(), Box<dyn Error>> {
    let (interrupt_tx, interrupts) = mpsc::channel();
    ctrlc::set_handler(move || {
        // the receiver is gone once we're already shutting down
        let _ = interrupt_tx.send(());
    })?;

    let (tx, rx) = mpsc::channel::<Ring>();
    scheduler.set_sink(ChannelSink::new(
        tx,
        config.default_sound.clone(),
        config.volume(),
    ));

    let show_notifications = config.show_notifications;
    let time_format = config.time_format.clone();
    // audio and dialogs belong to the desktop front end, here we ring the
    // terminal bell
    let ringer = thread::spawn(move || {
        for ring in rx {
            let now = chrono::Local::now().format(&time_format).to_string();
            info!("ringing {} at {now}", ring.trigger_id);
            if show_notifications {
                let sound = ring
                    .sound
                    .as_ref()
                    .map_or_else(|| "bell".to_string(), |path| path.display().to_string());
                println!(
                    "\x07{now} reminder: {} (sound: {sound}, volume: {:.0}%)",
                    if ring.message.is_empty() {
                        "time's up"
                    } else {
                        ring.message.as_str()
                    },
                    ring.volume * 100.0
                );
            }
        }
    });

    scheduler.start();
    println!("watching {} reminders", scheduler.len());
    if wait_for_shutdown(&interrupts, duration) {
        info!("interrupted, shutting down");
    }
    scheduler.stop();
    // dropping the sink closes the channel so the ringer can finish
    scheduler.clear_sink();
    if ringer.join().is_err() {
        warn!("ringer thread panicked");
    }
    Ok(())
}

/// Blocks until `duration` has passed, or forever without one. Returns
/// early, with true, when an interrupt arrives.
fn wait_for_shutdown(interrupts: &Receiver<()>, duration: Option<Duration>) -> bool {
    match duration {
        Some(duration) => interrupts.recv_timeout(duration).is_ok(),
        None => interrupts.recv().is_ok(),
    }
}
