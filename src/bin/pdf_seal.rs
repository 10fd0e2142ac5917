//! pdf-seal command line
//!
//! Usage:
//!   pdf-seal sign --pdf IN --p12 FILE --password PW --image IMG --page N --rect x,y,w,h
//!                 [--canvas W,H] [--out OUT] [--tsa URL] [--seal IMG] [--location L]
//!                 [--reason R] [--initial] [--config FILE]
//!   pdf-seal verify FILE
//!   pdf-seal batch --p12 FILE --password PW --image IMG --page N --rect x,y,w,h
//!                  [--canvas W,H] [--out-dir DIR] [--audit FILE] [--config FILE] FILES...
//!
//! Set RUST_LOG=debug for detailed logs.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use pdf_seal::batch::{BatchCoordinator, BatchDocument, BatchRequest, DirectoryOutputSink, WorkerPool};
use pdf_seal::geometry::{CanvasSize, SignaturePlacement};
use pdf_seal::pipeline::SigningRequest;
use pdf_seal::signatures::{SignatureVerifier, TsaConfig};
use pdf_seal::{AuditSink, JsonLinesAuditLog, MemoryAuditLog, SealConfig};

type CliResult<T> = Result<T, Box<dyn Error>>;

/// Options shared by `sign` and `batch`.
#[derive(Default)]
struct SignArgs {
    pdf: Option<PathBuf>,
    p12: Option<PathBuf>,
    password: String,
    image: Option<PathBuf>,
    seal: Option<PathBuf>,
    page: u32,
    rect: Option<(f64, f64, f64, f64)>,
    canvas: Option<(f64, f64)>,
    out: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    audit: Option<PathBuf>,
    tsa: Option<String>,
    location: Option<String>,
    reason: Option<String>,
    config: Option<PathBuf>,
    initial: bool,
    files: Vec<PathBuf>,
}

impl SignArgs {
    fn parse(args: &[String]) -> CliResult<Self> {
        let mut parsed = SignArgs {
            page: 1,
            ..SignArgs::default()
        };

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || -> CliResult<String> {
                i += 1;
                args.get(i).cloned().ok_or_else(|| format!("{} needs a value", flag).into())
            };
            match flag {
                "--pdf" => parsed.pdf = Some(PathBuf::from(value()?)),
                "--p12" => parsed.p12 = Some(PathBuf::from(value()?)),
                "--password" => parsed.password = value()?,
                "--image" => parsed.image = Some(PathBuf::from(value()?)),
                "--seal" => parsed.seal = Some(PathBuf::from(value()?)),
                "--page" => parsed.page = value()?.parse()?,
                "--rect" => {
                    let v = numbers(&value()?, 4)?;
                    parsed.rect = Some((v[0], v[1], v[2], v[3]));
                },
                "--canvas" => {
                    let v = numbers(&value()?, 2)?;
                    parsed.canvas = Some((v[0], v[1]));
                },
                "--out" => parsed.out = Some(PathBuf::from(value()?)),
                "--out-dir" => parsed.out_dir = Some(PathBuf::from(value()?)),
                "--audit" => parsed.audit = Some(PathBuf::from(value()?)),
                "--tsa" => parsed.tsa = Some(value()?),
                "--location" => parsed.location = Some(value()?),
                "--reason" => parsed.reason = Some(value()?),
                "--config" => parsed.config = Some(PathBuf::from(value()?)),
                "--initial" => parsed.initial = true,
                other if other.starts_with("--") => return Err(format!("unknown option {}", other).into()),
                other => parsed.files.push(PathBuf::from(other)),
            }
            i += 1;
        }
        Ok(parsed)
    }

    fn config(&self) -> CliResult<SealConfig> {
        let mut config = match &self.config {
            Some(path) => SealConfig::from_file(path)?,
            None => SealConfig::default(),
        };
        if let Some(url) = &self.tsa {
            config.tsa = TsaConfig::basic(url.clone());
        }
        config.validate()?;
        Ok(config)
    }

    /// Request template without the document itself.
    fn template(&self) -> CliResult<SigningRequest> {
        let p12 = self.p12.as_ref().ok_or("--p12 is required")?;
        let image = self.image.as_ref().ok_or("--image is required")?;
        let (x, y, w, h) = self.rect.ok_or("--rect is required")?;

        let mut request = SigningRequest::new("", Vec::new(), std::fs::read(image)?, std::fs::read(p12)?, &self.password)
            .with_placement(SignaturePlacement::new(self.page, x, y, w, h))
            .with_initial(self.initial);
        if let Some((width, height)) = self.canvas {
            request = request.with_canvas(CanvasSize::new(width, height));
        }
        if let Some(seal) = &self.seal {
            request = request.with_seal(std::fs::read(seal)?);
        }
        if let Some(location) = &self.location {
            request = request.with_location(location);
        }
        if let Some(reason) = &self.reason {
            request = request.with_reason(reason);
        }
        Ok(request)
    }
}

fn numbers(value: &str, count: usize) -> CliResult<Vec<f64>> {
    let parsed = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()?;
    if parsed.len() != count {
        return Err(format!("expected {} comma-separated numbers, got '{}'", count, value).into());
    }
    Ok(parsed)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.pdf".to_string())
}

fn sign(args: &[String]) -> CliResult<()> {
    let args = SignArgs::parse(args)?;
    let config = args.config()?;
    let pdf_path = args.pdf.as_ref().ok_or("--pdf is required")?;

    let mut request = args.template()?;
    request.source_name = file_name(pdf_path);
    request.source_pdf = std::fs::read(pdf_path)?;

    let signed = config.signing_service()?.sign(request)?;
    for skipped in &signed.skipped_placements {
        eprintln!("warning: {}", skipped);
    }

    let out = args.out.clone().unwrap_or_else(|| {
        pdf_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&signed.output_name)
    });
    std::fs::write(&out, &signed.bytes)?;
    println!(
        "{} (field {}, timestamped: {})",
        out.display(),
        signed.field_name,
        signed.timestamped
    );
    Ok(())
}

fn verify(args: &[String]) -> CliResult<bool> {
    let path = args.first().ok_or("verify needs a file")?;
    let report = SignatureVerifier::new().verify(&std::fs::read(path)?)?;
    println!("{}", report.to_json()?);
    Ok(report.all_valid)
}

fn batch(args: &[String]) -> CliResult<bool> {
    let args = SignArgs::parse(args)?;
    let config = args.config()?;
    if args.files.is_empty() {
        return Err("batch needs at least one PDF".into());
    }

    let documents = args
        .files
        .iter()
        .map(|path| -> CliResult<BatchDocument> { Ok(BatchDocument::new(file_name(path), std::fs::read(path)?)) })
        .collect::<CliResult<Vec<_>>>()?;

    let audit: Box<dyn AuditSink> = match &args.audit {
        Some(path) => Box::new(JsonLinesAuditLog::open(path)?),
        None => Box::new(MemoryAuditLog::new()),
    };
    let outputs = DirectoryOutputSink::new(args.out_dir.clone().unwrap_or_else(|| PathBuf::from(".")));

    let coordinator = BatchCoordinator::new(WorkerPool::new(config.batch.workers)?, config.batch.clone())
        .with_service(config.signing_service()?);
    let report = coordinator.run(
        BatchRequest::new(documents, args.template()?),
        &outputs,
        audit.as_ref(),
        None,
    );
    coordinator.shutdown();

    println!("{}", report.to_json()?);
    Ok(report.failure_count == 0)
}

fn usage() {
    eprintln!("Usage:");
    eprintln!("  pdf-seal sign --pdf IN --p12 FILE --password PW --image IMG --page N --rect x,y,w,h [options]");
    eprintln!("  pdf-seal verify FILE");
    eprintln!("  pdf-seal batch --p12 FILE --password PW --image IMG --page N --rect x,y,w,h [options] FILES...");
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let rest = args.get(2..).unwrap_or_default();
    let outcome = match args.get(1).map(String::as_str) {
        Some("sign") => sign(rest).map(|_| true),
        Some("verify") => verify(rest),
        Some("batch") => batch(rest),
        _ => {
            usage();
            return ExitCode::from(2);
        },
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        },
    }
}
