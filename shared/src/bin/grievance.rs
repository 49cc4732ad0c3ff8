//! Command-line shell for the grievance client.
//!
//! ```bash
//! grievance submit --photo light.jpg --lat 12.9716 --lon 77.5946 --description "Out for a week"
//! grievance track GRV-2026-0042
//! grievance queue
//! grievance sync
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use shared::category::Category;
use shared::config::ClientConfig;
use shared::geolocation::{GeoError, GeoFix};
use shared::image_processing::ImageSource;
use shared::shell::{
    init_tracing, FixedLocation, GeolocationProvider, NoLocation, ReqwestExecutor, Shell,
    ShellError, SqliteKvStore,
};
use shared::wizard::{Outcome, WizardStep};
use shared::{Event, UnixTimeMs, ViewModel};

const DEFAULT_DATA_DIR: &str = ".grievance";
const DB_FILE: &str = "grievance.db";

#[derive(Parser, Debug)]
#[clap(name = "grievance")]
#[clap(about = "Report civic problems with a photo and a location")]
struct Args {
    /// TOML config file
    #[clap(long, value_name = "FILE", env = "GRIEVANCE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for the local store (overrides config)
    #[clap(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Default log level when RUST_LOG is unset
    #[clap(long, default_value = "warn")]
    log_level: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk the wizard and submit a complaint
    Submit {
        #[clap(long, value_name = "FILE")]
        photo: PathBuf,

        #[clap(long, allow_hyphen_values = true)]
        lat: f64,

        #[clap(long, allow_hyphen_values = true)]
        lon: f64,

        /// Reported GPS accuracy in metres
        #[clap(long, default_value = "10")]
        accuracy: f64,

        /// Use this category instead of the classifier's
        #[clap(long)]
        category: Option<Category>,

        #[clap(long, default_value = "")]
        description: String,

        /// Queue locally instead of sending now
        #[clap(long)]
        offline: bool,

        /// Submit even if nearby complaints look the same
        #[clap(long)]
        confirm_not_duplicate: bool,
    },

    /// Show the status of a submitted complaint
    Track { complaint_id: String },

    /// List complaints waiting in the offline queue
    Queue,

    /// Send queued complaints, including ones that failed before
    Sync,

    /// Drop delivered complaints from the queue
    Cleanup,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "grievance failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode, ShellError> {
    let mut config = ClientConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.data_dir {
        config.data_dir = Some(dir);
    }
    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    std::fs::create_dir_all(&data_dir)?;
    let store = SqliteKvStore::open(&data_dir.join(DB_FILE))?;
    let http = Arc::new(ReqwestExecutor::new()?);

    let (online, geolocation): (bool, Box<dyn GeolocationProvider>) = match &args.command {
        Command::Submit {
            lat,
            lon,
            accuracy,
            offline,
            ..
        } => {
            let provider: Box<dyn GeolocationProvider> =
                match GeoFix::new(*lat, *lon, *accuracy, UnixTimeMs::now()) {
                    Ok(fix) => Box::new(FixedLocation::new(fix)),
                    Err(e) => {
                        eprintln!("invalid coordinates: {e}");
                        Box::new(NoLocation::new(GeoError::PositionUnavailable))
                    }
                };
            (!offline, provider)
        }
        Command::Sync | Command::Track { .. } => {
            (true, Box::new(NoLocation::new(GeoError::PositionUnavailable)))
        }
        Command::Queue | Command::Cleanup => {
            (false, Box::new(NoLocation::new(GeoError::PositionUnavailable)))
        }
    };

    config.validate()?;
    let mut shell = Shell::new(config, http, Box::new(store), geolocation);
    if !online {
        shell
            .dispatch(Event::NetworkStatusChanged { online: false })
            .await;
    }
    shell.dispatch(Event::WizardOpened).await;

    match args.command {
        Command::Submit {
            photo,
            category,
            description,
            confirm_not_duplicate,
            ..
        } => {
            let photo = std::fs::read(&photo)?;
            submit(&mut shell, photo, category, description, confirm_not_duplicate).await
        }
        Command::Track { complaint_id } => {
            shell
                .dispatch(Event::TrackComplaintRequested { complaint_id })
                .await;
            Ok(print_tracking(&shell.view()))
        }
        Command::Queue => {
            print_queue(&shell.view());
            Ok(ExitCode::SUCCESS)
        }
        Command::Sync => {
            shell.dispatch(Event::SyncRequested).await;
            print_notice(&shell.view());
            print_queue(&shell.view());
            Ok(ExitCode::SUCCESS)
        }
        Command::Cleanup => {
            shell.dispatch(Event::QueueCleanupRequested).await;
            print_notice(&shell.view());
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn submit(
    shell: &mut Shell,
    photo: Vec<u8>,
    category: Option<Category>,
    description: String,
    confirm_not_duplicate: bool,
) -> Result<ExitCode, ShellError> {
    // A submit from the command line always starts a fresh complaint.
    shell.dispatch(Event::WizardReset).await;
    shell.dispatch(Event::ConsentAccepted).await;

    shell
        .dispatch(Event::PhotoSelected(Box::new(ImageSource::Bytes(photo))))
        .await;
    if let Some(message) = shell.view().wizard.photo_error {
        return Ok(fail(&message));
    }

    shell.dispatch(Event::ProceedToClassify).await;
    let view = shell.view().wizard;
    if let Some(category) = category {
        shell
            .dispatch(Event::CategoryOverridden { category })
            .await;
    } else if view.needs_category_override {
        if let Some(message) = &view.classification_error {
            eprintln!("{message}");
        }
        if let Some(suggestion) = &view.low_confidence_suggestion {
            eprintln!("The classifier suggested '{suggestion}' with low confidence.");
        }
        return Ok(fail("Pass --category to choose the issue type."));
    }
    if let Some(category) = &shell.view().wizard.category {
        println!("Category: {category}");
    }

    shell.dispatch(Event::ProceedToDetails).await;
    let view = shell.view().wizard;
    let Some(location) = view.location else {
        return Ok(fail(
            view.location_error.as_deref().unwrap_or("No location available."),
        ));
    };
    println!(
        "Location: {:.5}, {:.5} ({})",
        location.latitude, location.longitude, location.accuracy_text
    );
    if let Some(address) = &view.address {
        println!("Address: {address}");
    }

    if !description.is_empty() {
        shell
            .dispatch(Event::DescriptionChanged { text: description })
            .await;
        if shell.view().wizard.description.is_empty() {
            return Ok(fail("Description is too long."));
        }
    }

    shell.dispatch(Event::ProceedToPreview).await;
    if !settle_duplicates(shell, confirm_not_duplicate).await {
        return Ok(fail(
            "Not submitted. Pass --confirm-not-duplicate if this is a different problem.",
        ));
    }
    if shell.view().wizard.duplicates_unverified {
        eprintln!("Could not check for duplicates; submitting anyway.");
    }

    shell.dispatch(Event::SubmitRequested).await;
    // The server runs its own check on create and may still object.
    if !settle_duplicates(shell, confirm_not_duplicate).await {
        return Ok(fail(
            "Not submitted. Pass --confirm-not-duplicate if this is a different problem.",
        ));
    }

    let view = shell.view();
    match (&view.wizard.outcome, view.wizard.step) {
        (Some(Outcome::Submitted { complaint_id }), WizardStep::Success) => {
            info!(%complaint_id, "submitted");
            println!("Submitted. Complaint ID: {complaint_id}");
            Ok(ExitCode::SUCCESS)
        }
        (Some(Outcome::Queued { offline_id }), _) => {
            println!("Saved offline as {offline_id}. Run `grievance sync` when connected.");
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(fail(
            view.wizard
                .submission_error
                .as_deref()
                .unwrap_or("Submission did not complete."),
        )),
    }
}

/// Shows any open duplicate prompt and answers it. Returns false when the
/// user did not confirm.
async fn settle_duplicates(shell: &mut Shell, confirm: bool) -> bool {
    let Some(prompt) = shell.view().wizard.duplicate_prompt else {
        return true;
    };
    println!("Similar complaints nearby:");
    for candidate in std::iter::once(&prompt.primary).chain(&prompt.others) {
        println!(
            "  {}  {}  {}  {}",
            candidate.complaint_id, candidate.category, candidate.distance_text, candidate.status
        );
    }
    if confirm {
        shell.dispatch(Event::NotDuplicateConfirmed).await;
        true
    } else {
        shell.dispatch(Event::DuplicateModalCancelled).await;
        false
    }
}

fn fail(message: &str) -> ExitCode {
    eprintln!("{message}");
    ExitCode::FAILURE
}

fn print_notice(view: &ViewModel) {
    if let Some(toast) = &view.toast {
        println!("{}", toast.message);
    }
    if let Some(error) = &view.error {
        eprintln!("{error}");
    }
}

fn print_queue(view: &ViewModel) {
    let counts = view.queue.counts;
    println!(
        "{} pending, {} syncing, {} synced, {} failed",
        counts.pending, counts.syncing, counts.synced, counts.failed
    );
    for item in &view.queue.items {
        let mut line = format!(
            "  {}  {}  {}  queued {}  attempts {}",
            item.offline_id, item.category, item.status, item.queued, item.attempts
        );
        if let Some(id) = &item.complaint_id {
            line.push_str(&format!("  -> {id}"));
        }
        if item.awaiting_confirmation {
            line.push_str("  (possible duplicate)");
        }
        if let Some(error) = &item.last_error {
            line.push_str(&format!("  [{error}]"));
        }
        println!("{line}");
    }
}

fn print_tracking(view: &ViewModel) -> ExitCode {
    let tracking = &view.tracking;
    let Some(record) = &tracking.record else {
        return fail(tracking.error.as_deref().unwrap_or("Status unavailable."));
    };
    println!("{}  {}", record.complaint_id, record.status);
    if let Some(category) = &record.category {
        println!("Category: {category}");
    }
    if let Some(address) = &record.address {
        println!("Address: {address}");
    }
    if let Some(submitted) = &record.submitted {
        println!("Submitted: {submitted}");
    }
    for item in &record.history {
        println!(
            "  {}  {}  {}",
            item.when.as_deref().unwrap_or("-"),
            item.status,
            item.note.as_deref().unwrap_or("")
        );
    }
    ExitCode::SUCCESS
}
