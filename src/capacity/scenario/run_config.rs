use serde::Serialize;

/// Simulator run configuration, binding the scenario files and the simulated time span.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename = "configuration")]
pub struct RunConfiguration {
    pub input: Input,
    pub time: Time,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Input {
    #[serde(rename = "net-file")]
    pub net_file: Value,
    #[serde(rename = "route-files")]
    pub route_files: Value,
    #[serde(rename = "additional-files")]
    pub additional_files: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Time {
    pub begin: Value,
    pub end: Value,
    #[serde(rename = "step-length")]
    pub step_length: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Value {
    #[serde(rename = "@value")]
    pub value: String,
}

impl Value {
    fn new(value: impl ToString) -> Self {
        Value {
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunTiming {
    /// Simulated seconds.
    pub duration: u32,
    /// Simulated seconds per step.
    pub step_length: f64,
}

impl RunTiming {
    pub fn steps(&self) -> u64 {
        (self.duration as f64 / self.step_length).round() as u64
    }
}

impl RunConfiguration {
    /// File names are resolved by the simulator relative to the configuration file.
    pub fn new(network: &str, routes: &str, additional: &str, timing: RunTiming) -> Self {
        RunConfiguration {
            input: Input {
                net_file: Value::new(network),
                route_files: Value::new(routes),
                additional_files: Value::new(additional),
            },
            time: Time {
                begin: Value::new(0),
                end: Value::new(timing.duration),
                step_length: Value::new(timing.step_length),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{RunConfiguration, RunTiming};
    use crate::capacity::io::xml::to_string;

    #[test]
    fn step_count_is_rounded() {
        let timing = RunTiming {
            duration: 600,
            step_length: 0.2,
        };
        // 600 / 0.2 is 2999.9999999999995 in floating point
        assert_eq!(3000, timing.steps());
        assert_eq!(
            1800,
            RunTiming {
                duration: 1800,
                step_length: 1.
            }
            .steps()
        );
    }

    #[test]
    fn configuration_xml() {
        let timing = RunTiming {
            duration: 600,
            step_length: 0.2,
        };
        let config = RunConfiguration::new("filtered.net.xml", "route.rou.xml", "detector.add.xml", timing);
        let text = to_string(&config).unwrap();

        assert!(text.contains("<net-file value=\"filtered.net.xml\"/>"));
        assert!(text.contains("<route-files value=\"route.rou.xml\"/>"));
        assert!(text.contains("<additional-files value=\"detector.add.xml\"/>"));
        assert!(text.contains("<end value=\"600\"/>"));
        assert!(text.contains("<step-length value=\"0.2\"/>"));
    }
}
