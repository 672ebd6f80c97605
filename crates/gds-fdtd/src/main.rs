//! gds-fdtd: CLI for extruding layouts and assembling S-parameters

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use gds_fdtd::{
    generate_tidy3d_script, load_component, load_device, Component, ExtractionConfig, FieldAxis,
    ResultsDirectory, ScriptConfig, Simulation, Technology, WavelengthSweep,
};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Grid of exported layouts, 1 nm
const DEFAULT_DBU: f64 = 0.001;

#[derive(Parser, Debug)]
#[command(name = "gds-fdtd")]
#[command(about = "Extrude photonic layouts into 3D devices and assemble FDTD S-parameters")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract a component and write it as JSON
    Extract {
        #[command(flatten)]
        device: DeviceArgs,

        /// Output JSON file
        #[arg(short, long)]
        output: PathBuf,

        /// Also write the layout with port extensions drawn on layer 1/0
        #[arg(long)]
        extensions: bool,

        /// Also save the extracted device-layer polygons as GDSII
        #[arg(long)]
        export_layout: Option<PathBuf>,
    },
    /// Generate a Tidy3D script for one source port
    Script {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        sweep: SweepArgs,

        /// Source port position in the port list
        #[arg(long, default_value = "0")]
        in_port: usize,

        /// Number of modes decomposed at each monitor
        #[arg(long, default_value = "1")]
        num_modes: usize,

        /// Field monitor normal axis (x, y, z)
        #[arg(long, default_value = "z")]
        field_axis: FieldAxis,

        /// Output Python file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Turn solver results (<results>/<job>.json) into S-parameters
    Sparams {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        sweep: SweepArgs,

        /// Directory holding one result file per job
        #[arg(long)]
        results: PathBuf,

        /// Number of modes decomposed at each monitor
        #[arg(long, default_value = "1")]
        num_modes: usize,

        /// Output JSON file
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
struct DeviceArgs {
    /// Input layout (GDSII)
    #[arg(short, long)]
    input: PathBuf,

    /// Technology file (YAML)
    #[arg(short, long)]
    tech: PathBuf,

    /// Top cell, required when the layout has several
    #[arg(long)]
    top_cell: Option<String>,

    /// Simulation region height in µm
    #[arg(long, default_value = "3.0")]
    z_span: f64,

    /// Simulation region vertical center in µm
    #[arg(long)]
    z_center: Option<f64>,

    /// Label match tolerance in µm
    #[arg(long)]
    label_tolerance: Option<f64>,
}

#[derive(ClapArgs, Debug)]
struct SweepArgs {
    /// Shortest wavelength in µm
    #[arg(long, default_value = "1.45")]
    wavl_min: f64,

    /// Longest wavelength in µm
    #[arg(long, default_value = "1.65")]
    wavl_max: f64,

    /// Number of wavelength points
    #[arg(long, default_value = "101")]
    wavl_pts: usize,
}

impl SweepArgs {
    fn sweep(&self) -> WavelengthSweep {
        WavelengthSweep::new(self.wavl_min, self.wavl_max, self.wavl_pts)
    }
}

impl DeviceArgs {
    fn config(&self) -> ExtractionConfig {
        ExtractionConfig {
            z_span: self.z_span,
            z_center: self.z_center,
            label_tolerance: self.label_tolerance,
            ..Default::default()
        }
    }

    fn technology(&self) -> Result<Technology> {
        Technology::load(&self.tech)
            .with_context(|| format!("Failed to read technology file: {:?}", self.tech))
    }

    fn component(&self) -> Result<Component> {
        let tech = self.technology()?;
        load_component(&self.input, &tech, self.top_cell.as_deref(), &self.config())
            .with_context(|| format!("Failed to extract component from {:?}", self.input))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match args.command {
        Command::Extract {
            device,
            output,
            extensions,
            export_layout,
        } => {
            let component = if extensions {
                let tech = device.technology()?;
                let (component, written) =
                    load_device(&device.input, &tech, device.top_cell.as_deref(), &device.config())
                        .with_context(|| format!("Failed to load device {:?}", device.input))?;
                eprintln!("Wrote port-extended layout: {:?}", written);
                component
            } else {
                device.component()?
            };
            fs::write(&output, serde_json::to_string_pretty(&component)?)
                .with_context(|| format!("Failed to write output file: {:?}", output))?;
            eprintln!("Extracted {}: {:?}", component.name, output);
            if let Some(path) = export_layout {
                component
                    .write_layout(&path, DEFAULT_DBU)
                    .with_context(|| format!("Failed to export layout: {:?}", path))?;
                eprintln!("Exported layer polygons: {:?}", path);
            }
        }
        Command::Script {
            device,
            sweep,
            in_port,
            num_modes,
            field_axis,
            output,
        } => {
            let component = device.component()?;
            let sim = Simulation::all_ports(component, sweep.sweep(), num_modes)
                .context("Simulation setup failed")?;
            let job = sim
                .jobs()
                .get(in_port)
                .with_context(|| format!("No port at position {in_port}"))?;
            let config = ScriptConfig {
                field_monitor_axis: field_axis,
                ..Default::default()
            };
            let script =
                generate_tidy3d_script(&sim, job, &config).context("Script generation failed")?;

            match output {
                Some(path) => {
                    fs::write(&path, &script)
                        .with_context(|| format!("Failed to write output file: {:?}", path))?;
                    eprintln!("Generated Tidy3D script: {:?}", path);
                }
                None => println!("{}", script),
            }
        }
        Command::Sparams {
            device,
            sweep,
            results,
            num_modes,
            output,
        } => {
            let component = device.component()?;
            let sim = Simulation::all_ports(component, sweep.sweep(), num_modes)
                .context("Simulation setup failed")?;
            let report = sim.execute(&mut ResultsDirectory::new(&results));
            for failure in report.failures() {
                eprintln!("Job {} failed: {:?}", failure.job, failure.status);
            }
            report
                .sparameters
                .save(&output)
                .with_context(|| format!("Failed to write output file: {:?}", output))?;
            info!("{} S-parameters written", report.sparameters.len());
            if !report.is_success() {
                anyhow::bail!("{} of {} jobs failed", report.failures().count(), report.outcomes.len());
            }
        }
    }

    Ok(())
}
