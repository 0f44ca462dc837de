use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use sumo_capacity::capacity::driver::{
    SimOverrides, SimulationBackend, SimulationError, SimulationSession,
};
use sumo_capacity::capacity::scenario::extract::{
    ExternalToolError, FilterRequest, NetworkFilter,
};

/// Copies the whole network instead of cropping it.
#[derive(Default)]
pub struct CopyFilter {
    pub fail: bool,
    pub keep_internal_links: RefCell<Vec<bool>>,
}

impl NetworkFilter for CopyFilter {
    fn filter(&self, request: &FilterRequest) -> Result<(), ExternalToolError> {
        self.keep_internal_links
            .borrow_mut()
            .push(request.keep_internal_links);
        let spawn_error = |source| ExternalToolError::Spawn {
            tool: "netconvert".to_string(),
            source,
        };
        if self.fail {
            return Err(spawn_error(std::io::Error::from(
                std::io::ErrorKind::NotFound,
            )));
        }
        fs::copy(request.source, request.output).map_err(spawn_error)?;
        Ok(())
    }
}

/// Pretends to simulate: on close, every detector of the scenario reports the same number of
/// vehicles in each 10 s interval up to the configured end time.
pub struct FakeSumo {
    pub vehicles_per_interval: u64,
    pub fail_start_at_scale: Option<f64>,
    pub fail_step_after: Option<u64>,
    pub starts: RefCell<Vec<SimOverrides>>,
    pub closes: RefCell<u32>,
}

impl FakeSumo {
    pub fn new(vehicles_per_interval: u64) -> Self {
        FakeSumo {
            vehicles_per_interval,
            fail_start_at_scale: None,
            fail_step_after: None,
            starts: RefCell::new(Vec::new()),
            closes: RefCell::new(0),
        }
    }
}

pub struct FakeSession<'a> {
    backend: &'a FakeSumo,
    dir: PathBuf,
    detector_files: Vec<String>,
    end: u32,
    steps: u64,
}

fn quoted_after<'t>(text: &'t str, marker: &str) -> Vec<&'t str> {
    text.split(marker)
        .skip(1)
        .filter_map(|rest| rest.find('"').map(|end| &rest[..end]))
        .collect()
}

impl<'a> SimulationBackend for &'a FakeSumo {
    type Session = FakeSession<'a>;

    fn start(
        &self,
        config: &Path,
        overrides: &SimOverrides,
    ) -> Result<FakeSession<'a>, SimulationError> {
        self.starts.borrow_mut().push(overrides.clone());
        if overrides.scale.is_some() && overrides.scale == self.fail_start_at_scale {
            return Err(SimulationError::Protocol("connection refused".to_string()));
        }

        let dir = config.parent().unwrap().to_path_buf();
        let run = fs::read_to_string(config)?;
        let additional_file = quoted_after(&run, "<additional-files value=\"")[0];
        let end = quoted_after(&run, "<end value=\"")[0].parse().unwrap();
        let additional = fs::read_to_string(dir.join(additional_file))?;

        Ok(FakeSession {
            backend: *self,
            detector_files: quoted_after(&additional, " file=\"")
                .into_iter()
                .map(str::to_string)
                .collect(),
            dir,
            end,
            steps: 0,
        })
    }
}

impl SimulationSession for FakeSession<'_> {
    fn step(&mut self) -> Result<(), SimulationError> {
        if Some(self.steps) == self.backend.fail_step_after {
            return Err(SimulationError::Protocol("simulation diverged".to_string()));
        }
        self.steps += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SimulationError> {
        *self.backend.closes.borrow_mut() += 1;
        for file in &self.detector_files {
            let mut text = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<detector>\n");
            for begin in (0..self.end).step_by(10) {
                text.push_str(&format!(
                    "    <interval begin=\"{begin}.00\" end=\"{}.00\" id=\"d\" nVehContrib=\"{}\" flow=\"0.00\"/>\n",
                    begin + 10,
                    self.backend.vehicles_per_interval
                ));
            }
            text.push_str("</detector>\n");
            let path = self.dir.join(file);
            fs::create_dir_all(path.parent().unwrap())?;
            fs::write(path, text)?;
        }
        Ok(())
    }
}
