//! Simulation jobs, the solver seam and S-parameter measurement
//!
//! The electromagnetic solve itself happens behind [`Solver`]. This module
//! only decides what each job launches, runs jobs in submission order and
//! normalizes the returned monitor amplitudes into [`SParameters`].

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::component::{port_index, Component, Port};
use crate::error::{Error, Result};
use crate::sparams::{SParam, SParameters};

/// Speed of light in µm/s
pub const C0_UM: f64 = 2.99792458e14;

/// Linear wavelength sweep in µm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WavelengthSweep {
    pub min: f64,
    pub max: f64,
    pub points: usize,
}

impl Default for WavelengthSweep {
    fn default() -> Self {
        Self {
            min: 1.45,
            max: 1.65,
            points: 101,
        }
    }
}

impl WavelengthSweep {
    pub fn new(min: f64, max: f64, points: usize) -> Self {
        Self { min, max, points }
    }

    /// Evenly spaced, both ends included
    pub fn wavelengths(&self) -> Vec<f64> {
        match self.points {
            0 => Vec::new(),
            1 => vec![self.min],
            n => {
                let step = (self.max - self.min) / (n - 1) as f64;
                (0..n).map(|i| self.min + step * i as f64).collect()
            }
        }
    }

    /// Frequencies in Hz, one per wavelength
    pub fn frequencies(&self) -> Vec<f64> {
        self.wavelengths().iter().map(|w| C0_UM / w).collect()
    }

    pub fn center(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// Propagation direction along a monitor's normal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Propagation {
    #[serde(rename = "+")]
    Forward,
    #[serde(rename = "-")]
    Backward,
}

impl Propagation {
    pub fn sign(&self) -> &'static str {
        match self {
            Propagation::Forward => "+",
            Propagation::Backward => "-",
        }
    }
}

/// Component read at the source plane of a port
pub fn source_direction(port: &Port) -> Propagation {
    if port.direction.is_positive() {
        Propagation::Backward
    } else {
        Propagation::Forward
    }
}

/// Component read at a port's output monitor
pub fn monitor_direction(port: &Port) -> Propagation {
    if port.direction.is_positive() {
        Propagation::Forward
    } else {
        Propagation::Backward
    }
}

/// One solver run: a mode launched at one port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimJob {
    pub name: String,
    /// Position of the source port in the component's port list
    pub in_port: usize,
    /// Mode launched by the source
    pub mode_index: usize,
    /// Modes decomposed at every monitor
    pub num_modes: usize,
}

impl SimJob {
    pub fn new(name: impl Into<String>, in_port: usize) -> Self {
        Self {
            name: name.into(),
            in_port,
            mode_index: 0,
            num_modes: 1,
        }
    }
}

/// Mode amplitudes at one monitor, indexed `[mode][frequency]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeAmplitudes {
    #[serde(rename = "+")]
    pub forward: Vec<Vec<Complex64>>,
    #[serde(rename = "-")]
    pub backward: Vec<Vec<Complex64>>,
}

impl ModeAmplitudes {
    pub fn get(&self, direction: Propagation, mode: usize) -> Option<&[Complex64]> {
        let by_mode = match direction {
            Propagation::Forward => &self.forward,
            Propagation::Backward => &self.backward,
        };
        by_mode.get(mode).map(Vec::as_slice)
    }
}

/// What a solver hands back for one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimResults {
    pub monitors: BTreeMap<String, ModeAmplitudes>,
}

impl SimResults {
    pub fn amplitudes(
        &self,
        monitor: &str,
        direction: Propagation,
        mode: usize,
    ) -> Result<&[Complex64]> {
        self.monitors
            .get(monitor)
            .ok_or_else(|| Error::MissingMonitor(monitor.to_string()))?
            .get(direction, mode)
            .ok_or_else(|| Error::MissingMode {
                monitor: monitor.to_string(),
                mode,
            })
    }
}

/// External FDTD engine. Each call blocks until the job's results are in.
pub trait Solver {
    fn run(&mut self, simulation: &Simulation, job: &SimJob) -> Result<SimResults>;
}

/// Solver backed by results already on disk as `<dir>/<job>.json`
#[derive(Debug, Clone)]
pub struct ResultsDirectory {
    pub dir: PathBuf,
}

impl ResultsDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Solver for ResultsDirectory {
    fn run(&mut self, _simulation: &Simulation, job: &SimJob) -> Result<SimResults> {
        let path = self.dir.join(format!("{}.json", job.name));
        let text = fs::read_to_string(&path).map_err(|e| Error::Solver {
            job: job.name.clone(),
            message: format!("{}: {e}", path.display()),
        })?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Per-job result of [`Simulation::execute`]
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Number of S-parameter entries the job contributed
    Completed(usize),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job: String,
    pub status: JobStatus,
}

/// Outcomes in submission order plus everything measured
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub outcomes: Vec<JobOutcome>,
    pub sparameters: SParameters,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.status, JobStatus::Completed(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, JobStatus::Failed(_)))
    }
}

/// A validated component plus the jobs to run on it
#[derive(Debug, Clone)]
pub struct Simulation {
    component: Component,
    sweep: WavelengthSweep,
    jobs: Vec<SimJob>,
}

impl Simulation {
    /// Fails when any port is missing its height or a job's source port does
    /// not exist.
    pub fn new(component: Component, sweep: WavelengthSweep, jobs: Vec<SimJob>) -> Result<Self> {
        let unresolved: Vec<String> = component
            .unresolved_ports()
            .map(|p| p.name.clone())
            .collect();
        if !unresolved.is_empty() {
            return Err(Error::UnresolvedPorts(unresolved));
        }
        let count = component.ports.len();
        if let Some(job) = jobs.iter().find(|j| j.in_port >= count) {
            return Err(Error::PortOutOfRange {
                index: job.in_port,
                count,
            });
        }
        Ok(Self {
            component,
            sweep,
            jobs,
        })
    }

    /// One job per port, named `{component}_{port}`
    pub fn all_ports(component: Component, sweep: WavelengthSweep, num_modes: usize) -> Result<Self> {
        let jobs = component
            .ports
            .iter()
            .enumerate()
            .map(|(i, p)| SimJob {
                num_modes,
                ..SimJob::new(format!("{}_{}", component.name, p.name), i)
            })
            .collect();
        Self::new(component, sweep, jobs)
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn sweep(&self) -> &WavelengthSweep {
        &self.sweep
    }

    pub fn jobs(&self) -> &[SimJob] {
        &self.jobs
    }

    /// Source port of `job`
    pub fn in_port(&self, job: &SimJob) -> &Port {
        &self.component.ports[job.in_port]
    }

    /// One row of the scattering matrix: every port's `out_mode` amplitude
    /// divided by the source amplitude, in port order.
    pub fn measure_transmission(
        &self,
        results: &SimResults,
        in_port: &Port,
        in_mode: usize,
        out_mode: usize,
    ) -> Result<Vec<SParam>> {
        let expected = self.sweep.points;
        let check = |monitor: &str, values: &[Complex64]| {
            if values.len() == expected {
                Ok(())
            } else {
                Err(Error::SpectrumLength {
                    monitor: monitor.to_string(),
                    expected,
                    found: values.len(),
                })
            }
        };

        let input = results.amplitudes(&in_port.name, source_direction(in_port), in_mode)?;
        check(&in_port.name, input)?;
        let idx_in = in_port.idx()?;
        let freq = self.sweep.frequencies();

        let mut row = Vec::with_capacity(self.component.ports.len());
        for port in &self.component.ports {
            let raw = results.amplitudes(&port.name, monitor_direction(port), out_mode)?;
            check(&port.name, raw)?;
            let s: Vec<Complex64> = raw.iter().zip(input).map(|(b, a)| b / a).collect();

            debug!(
                monitor = %port.name,
                "amplitude^2 = {:?}",
                s.iter().map(|v| v.norm_sqr()).collect::<Vec<_>>()
            );
            debug!(
                monitor = %port.name,
                "phase = {:?} (rad)",
                s.iter().map(|v| v.arg()).collect::<Vec<_>>()
            );

            row.push(SParam::new(
                idx_in,
                port_index(&port.name)?,
                in_mode,
                out_mode,
                freq.clone(),
                s,
            ));
        }
        Ok(row)
    }

    fn run_job<S: Solver>(&self, solver: &mut S, job: &SimJob) -> Result<Vec<SParam>> {
        let results = solver.run(self, job)?;
        let in_port = self.in_port(job);
        let mut entries = Vec::new();
        for mode in 0..job.num_modes {
            entries.extend(self.measure_transmission(&results, in_port, job.mode_index, mode)?);
        }
        Ok(entries)
    }

    /// Run every job in submission order. A failing job is recorded and the
    /// remaining jobs still run.
    pub fn execute<S: Solver>(&self, solver: &mut S) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for job in &self.jobs {
            info!("Running job {} (source {})", job.name, self.in_port(job).name);
            let status = match self.run_job(solver, job) {
                Ok(entries) => {
                    let count = entries.len();
                    report.sparameters.extend(entries);
                    JobStatus::Completed(count)
                }
                Err(e) => {
                    warn!("Job {} failed: {e}", job.name);
                    JobStatus::Failed(e.to_string())
                }
            };
            report.outcomes.push(JobOutcome {
                job: job.name.clone(),
                status,
            });
        }
        info!(
            "{} of {} jobs completed, {} S-parameters",
            report.outcomes.len() - report.failures().count(),
            report.outcomes.len(),
            report.sparameters.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Region, Structure, StructureGroup};
    use crate::geometry::Direction;
    use crate::material::Material;
    use pretty_assertions::assert_eq;

    fn waveguide() -> Component {
        let core = Structure::new(
            "Si_0",
            vec![[-10.0, -0.25], [10.0, -0.25], [10.0, 0.25], [-10.0, 0.25]],
            0.0,
            0.22,
            Material::index("Si", 3.47),
        );
        Component::new(
            "wg",
            vec![StructureGroup::Layer(vec![core])],
            vec![
                Port::new("opt1", [-10.0, 0.0], 0.5, Direction::West),
                Port::new("opt2", [10.0, 0.0], 0.5, Direction::East),
            ],
            Region::new(
                vec![[-11.0, -2.0], [11.0, -2.0], [11.0, 2.0], [-11.0, 2.0]],
                0.11,
                4.0,
            ),
        )
    }

    fn sweep() -> WavelengthSweep {
        WavelengthSweep::new(1.5, 1.6, 3)
    }

    fn constant(v: Complex64, modes: usize) -> Vec<Vec<Complex64>> {
        vec![vec![v; 3]; modes]
    }

    /// Launch at opt1 gives a source amplitude of 2, 0.2 reflected and 1.5i
    /// transmitted into opt2; launch at opt2 mirrors it. "+" travels east at
    /// both monitors.
    fn results_for(in_port: usize) -> SimResults {
        let zero = Complex64::new(0.0, 0.0);
        let src = Complex64::new(2.0, 0.0);
        let refl = Complex64::new(0.2, 0.0);
        let through = Complex64::new(0.0, 1.5);
        let (opt1, opt2) = if in_port == 0 {
            (
                ModeAmplitudes {
                    forward: constant(src, 2),
                    backward: constant(refl, 2),
                },
                ModeAmplitudes {
                    forward: constant(through, 2),
                    backward: constant(zero, 2),
                },
            )
        } else {
            (
                ModeAmplitudes {
                    forward: constant(zero, 2),
                    backward: constant(through, 2),
                },
                ModeAmplitudes {
                    forward: constant(refl, 2),
                    backward: constant(src, 2),
                },
            )
        };
        SimResults {
            monitors: BTreeMap::from([("opt1".to_string(), opt1), ("opt2".to_string(), opt2)]),
        }
    }

    struct MockSolver {
        calls: Vec<String>,
        fail_on: Option<String>,
    }

    impl MockSolver {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                fail_on: None,
            }
        }
    }

    impl Solver for MockSolver {
        fn run(&mut self, _simulation: &Simulation, job: &SimJob) -> Result<SimResults> {
            self.calls.push(job.name.clone());
            if self.fail_on.as_deref() == Some(job.name.as_str()) {
                return Err(Error::Solver {
                    job: job.name.clone(),
                    message: "diverged".into(),
                });
            }
            Ok(results_for(job.in_port))
        }
    }

    #[test]
    fn test_sweep() {
        let s = sweep();
        let w = s.wavelengths();
        assert_eq!(w.len(), 3);
        assert_eq!(w[0], 1.5);
        assert!((w[1] - 1.55).abs() < 1e-12);
        assert!((w[2] - 1.6).abs() < 1e-12);
        assert!((s.frequencies()[0] - C0_UM / 1.5).abs() < 1.0);

        let d = WavelengthSweep::default();
        assert_eq!(d.wavelengths().len(), 101);
        assert!((d.center() - 1.55).abs() < 1e-12);
        assert_eq!(WavelengthSweep::new(1.3, 1.6, 1).wavelengths(), vec![1.3]);
    }

    #[test]
    fn test_direction_convention() {
        let east = Port::new("opt1", [0.0, 0.0], 0.5, Direction::East);
        let north = Port::new("opt1", [0.0, 0.0], 0.5, Direction::North);
        let west = Port::new("opt1", [0.0, 0.0], 0.5, Direction::West);
        let south = Port::new("opt1", [0.0, 0.0], 0.5, Direction::South);
        assert_eq!(source_direction(&east), Propagation::Backward);
        assert_eq!(source_direction(&north), Propagation::Backward);
        assert_eq!(source_direction(&west), Propagation::Forward);
        assert_eq!(source_direction(&south), Propagation::Forward);
        assert_eq!(monitor_direction(&east).sign(), "+");
        assert_eq!(monitor_direction(&south).sign(), "-");
    }

    #[test]
    fn test_rejects_unresolved_ports() {
        let mut c = waveguide();
        c.ports.push(Port::new("opt3", [50.0, 0.0], 0.5, Direction::East));
        assert!(matches!(
            Simulation::new(c, sweep(), vec![]),
            Err(Error::UnresolvedPorts(names)) if names == vec!["opt3".to_string()]
        ));
    }

    #[test]
    fn test_rejects_unknown_source_port() {
        assert!(matches!(
            Simulation::new(waveguide(), sweep(), vec![SimJob::new("bad", 2)]),
            Err(Error::PortOutOfRange { index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_self_transmission_is_unity() {
        let sim = Simulation::new(waveguide(), sweep(), vec![]).unwrap();
        let a = vec![
            Complex64::new(0.3, -1.2),
            Complex64::new(2.0, 0.5),
            Complex64::new(-0.7, 0.1),
        ];
        let mut monitors = BTreeMap::new();
        for name in ["opt1", "opt2"] {
            monitors.insert(
                name.to_string(),
                ModeAmplitudes {
                    forward: vec![a.clone()],
                    backward: vec![a.clone()],
                },
            );
        }
        let results = SimResults { monitors };

        let row = sim
            .measure_transmission(&results, &sim.component().ports[0], 0, 0)
            .unwrap();
        let s11 = &row[0];
        assert_eq!(s11.label(), "S11_idx00");
        for v in &s11.s {
            assert!((v.norm() - 1.0).abs() < 1e-12);
            assert!(v.arg().abs() < 1e-12);
        }
    }

    #[test]
    fn test_measure_transmission_normalizes() {
        let sim = Simulation::new(waveguide(), sweep(), vec![]).unwrap();
        let row = sim
            .measure_transmission(&results_for(0), &sim.component().ports[0], 0, 0)
            .unwrap();

        assert_eq!(row.len(), 2);
        assert_eq!(row[0].label(), "S11_idx00");
        assert_eq!(row[1].label(), "S21_idx00");
        assert_eq!(row[0].s, vec![Complex64::new(0.1, 0.0); 3]);
        assert_eq!(row[1].s, vec![Complex64::new(0.0, 0.75); 3]);
        assert_eq!(row[1].freq, sweep().frequencies());
    }

    #[test]
    fn test_missing_monitor_and_length_mismatch() {
        let sim = Simulation::new(waveguide(), sweep(), vec![]).unwrap();
        let mut results = results_for(0);
        results.monitors.remove("opt2");
        assert!(matches!(
            sim.measure_transmission(&results, &sim.component().ports[0], 0, 0),
            Err(Error::MissingMonitor(m)) if m == "opt2"
        ));

        let short = WavelengthSweep::new(1.5, 1.6, 5);
        let sim = Simulation::new(waveguide(), short, vec![]).unwrap();
        assert!(matches!(
            sim.measure_transmission(&results_for(0), &sim.component().ports[0], 0, 0),
            Err(Error::SpectrumLength { expected: 5, found: 3, .. })
        ));
    }

    #[test]
    fn test_execute_runs_jobs_in_order() {
        let sim = Simulation::all_ports(waveguide(), sweep(), 2).unwrap();
        assert_eq!(sim.jobs()[1].name, "wg_opt2");

        let mut solver = MockSolver::new();
        let report = sim.execute(&mut solver);

        assert_eq!(solver.calls, vec!["wg_opt1", "wg_opt2"]);
        assert!(report.is_success());
        // 2 jobs × 2 output modes × 2 ports
        assert_eq!(report.sparameters.len(), 8);
        let labels: Vec<String> = report.sparameters.entries()[..4]
            .iter()
            .map(SParam::label)
            .collect();
        assert_eq!(labels, ["S11_idx00", "S21_idx00", "S11_idx10", "S21_idx10"]);
        assert_eq!(report.sparameters.to_map()["S12_idx00"].s[0], Complex64::new(0.0, 0.75));
    }

    #[test]
    fn test_failed_job_does_not_stop_the_rest() {
        let sim = Simulation::all_ports(waveguide(), sweep(), 1).unwrap();
        let mut solver = MockSolver {
            fail_on: Some("wg_opt1".into()),
            ..MockSolver::new()
        };
        let report = sim.execute(&mut solver);

        assert!(!report.is_success());
        assert_eq!(solver.calls.len(), 2);
        assert_eq!(
            report.outcomes,
            vec![
                JobOutcome {
                    job: "wg_opt1".into(),
                    status: JobStatus::Failed("Solver failed on job wg_opt1: diverged".into()),
                },
                JobOutcome {
                    job: "wg_opt2".into(),
                    status: JobStatus::Completed(2),
                },
            ]
        );
        assert_eq!(report.sparameters.entries_in_ports(2, 1).len(), 1);
    }

    #[test]
    fn test_results_directory_solver() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("wg_opt1.json"),
            serde_json::to_string(&results_for(0)).unwrap(),
        )
        .unwrap();
        let sim = Simulation::all_ports(waveguide(), sweep(), 1).unwrap();
        let mut solver = ResultsDirectory::new(dir.path());

        let report = sim.execute(&mut solver);
        assert_eq!(report.outcomes[0].status, JobStatus::Completed(2));
        assert!(matches!(report.outcomes[1].status, JobStatus::Failed(_)));
    }
}
