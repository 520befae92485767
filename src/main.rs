use std::{
    fs::File,
    io::{BufWriter, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use clap::Parser;
use log::{info, warn};

use iqloop::{
    capture::RxRecord,
    config::{RunParams, StreamConfig},
    run::{run, RecordSink, RunSummary},
    sim::SimLoopback,
    RawSample,
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Hardware context locator. Only the built-in simulator transport is
    /// compiled into this binary; a real transport plugs in behind the
    /// `Hardware` trait.
    #[clap(value_name = "uri", default_value = "sim:")]
    uri: String,

    #[clap(long = "rx-buf", value_name = "samples per refill", default_value("256"))]
    rx_buf: usize,

    #[clap(long = "warmup", value_name = "discard cycles", default_value("2"))]
    warmup: usize,

    #[clap(long = "cycles", value_name = "capture cycles", default_value("40"))]
    cycles: usize,

    #[clap(long = "tone-hz", value_name = "tone freq Hz", default_value("50000"))]
    tone_hz: f64,

    #[clap(long = "ampl", value_name = "peak amplitude, pre-scaling", default_value("48"))]
    ampl: f64,

    #[clap(long = "tx-out", value_name = "transmitted csv", default_value("input.csv"))]
    tx_out: String,

    #[clap(long = "rx-out", value_name = "captured csv", default_value("output.csv"))]
    rx_out: String,
}

/// Writes the two row streams as delimited text: `i, q` for transmitted
/// samples, `i, q, amplitude, phase` for captured ones.
struct CsvSink {
    tx: BufWriter<File>,
    rx: BufWriter<File>,
    io_err: Option<std::io::Error>,
}

impl CsvSink {
    fn create(tx_path: &str, rx_path: &str) -> anyhow::Result<Self> {
        Ok(CsvSink {
            tx: BufWriter::new(
                File::create(tx_path).with_context(|| format!("creating {tx_path}"))?,
            ),
            rx: BufWriter::new(
                File::create(rx_path).with_context(|| format!("creating {rx_path}"))?,
            ),
            io_err: None,
        })
    }

    fn finish(mut self) -> anyhow::Result<()> {
        if let Some(e) = self.io_err.take() {
            return Err(e.into());
        }
        self.tx.flush()?;
        self.rx.flush()?;
        Ok(())
    }
}

impl RecordSink for CsvSink {
    fn transmitted(&mut self, i: RawSample, q: RawSample) {
        if self.io_err.is_none() {
            if let Err(e) = writeln!(self.tx, "{i}, {q}") {
                self.io_err = Some(e);
            }
        }
    }

    fn received(&mut self, rec: &RxRecord) {
        if self.io_err.is_none() {
            if let Err(e) = writeln!(
                self.rx,
                "{}, {}, {:.4}, {:.4}",
                rec.i, rec.q, rec.amplitude, rec.phase_deg
            ) {
                self.io_err = Some(e);
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Info)?;
    let args = Args::parse();

    if args.uri != "sim:" {
        anyhow::bail!(
            "context {:?} is not reachable from this build; only the sim: transport is compiled in",
            args.uri
        );
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        warn!("interrupt received, waiting for the current cycle to finish");
        cancel_flag.store(true, Ordering::Relaxed);
    })?;

    let params = RunParams {
        rx_buf_samples: args.rx_buf,
        warmup_cycles: args.warmup,
        capture_cycles: args.cycles,
        tone_hz: args.tone_hz,
        tone_ampl: args.ampl,
        ..RunParams::default()
    };

    let mut sink = CsvSink::create(&args.tx_out, &args.rx_out)?;
    let mut hw = SimLoopback::new();

    let RunSummary {
        transmitted,
        discarded,
        captured,
    } = run(
        &mut hw,
        &StreamConfig::loopback_rx(),
        &StreamConfig::loopback_tx(),
        &params,
        &cancel,
        &mut sink,
    )?;
    sink.finish()?;

    info!("transmitted {transmitted} samples ({})", args.tx_out);
    info!("discarded {discarded} warm-up samples");
    info!("captured {captured} samples ({})", args.rx_out);
    Ok(())
}
