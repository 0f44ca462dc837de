use serde::{Deserialize, Serialize};

use crate::capacity::config::ConfigError;

/// Behavioural vehicle classes that make up the simulated traffic mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleClass {
    Conventional,
    Automated,
    ConnectedAutomated,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 3] = [
        VehicleClass::Conventional,
        VehicleClass::ConnectedAutomated,
        VehicleClass::Automated,
    ];

    pub fn type_id(&self) -> &'static str {
        match self {
            VehicleClass::Conventional => "vehCV",
            VehicleClass::Automated => "vehAV",
            VehicleClass::ConnectedAutomated => "vehACV",
        }
    }

    fn color(&self) -> &'static str {
        match self {
            VehicleClass::Conventional => "1,0,0",
            VehicleClass::Automated => "0,1,0",
            VehicleClass::ConnectedAutomated => "0,0,1",
        }
    }

    pub fn default_params(&self) -> VehicleTypeParams {
        match self {
            VehicleClass::Conventional => VehicleTypeParams {
                impatience: Some(0.2),
                ..Default::default()
            },
            VehicleClass::Automated => VehicleTypeParams {
                decel: Some(3.0),
                sigma: Some(0.1),
                tau: Some(1.2),
                speed_factor: Some(1.0),
                speed_dev: Some(0.0),
                ..Default::default()
            },
            VehicleClass::ConnectedAutomated => VehicleTypeParams {
                min_gap: Some(0.5),
                accel: Some(2.6),
                decel: Some(3.5),
                sigma: Some(0.0),
                tau: Some(0.6),
                speed_factor: Some(1.0),
                speed_dev: Some(0.0),
                impatience: Some(0.0),
            },
        }
    }
}

/// Non-negative, unnormalized shares of conventional, automated and connected automated vehicles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleShares {
    #[serde(default)]
    pub cv: f64,
    #[serde(default)]
    pub av: f64,
    #[serde(default)]
    pub acv: f64,
}

impl VehicleShares {
    pub fn new(cv: f64, av: f64, acv: f64) -> Self {
        VehicleShares { cv, av, acv }
    }

    pub fn normalize(&self) -> Result<VehicleMix, ConfigError> {
        let shares = [self.cv, self.av, self.acv];
        if shares.iter().any(|s| !s.is_finite() || *s < 0.) {
            return Err(ConfigError::InvalidShare(*self));
        }
        let total: f64 = shares.iter().sum();
        if total <= 0. {
            return Err(ConfigError::NoVehicleShares);
        }
        Ok(VehicleMix {
            conventional: self.cv / total,
            automated: self.av / total,
            connected_automated: self.acv / total,
        })
    }
}

/// Probability weights of the vehicle classes. They sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleMix {
    pub conventional: f64,
    pub automated: f64,
    pub connected_automated: f64,
}

impl VehicleMix {
    pub fn weight(&self, class: VehicleClass) -> f64 {
        match class {
            VehicleClass::Conventional => self.conventional,
            VehicleClass::Automated => self.automated,
            VehicleClass::ConnectedAutomated => self.connected_automated,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleTypeParams {
    pub min_gap: Option<f64>,
    pub accel: Option<f64>,
    pub decel: Option<f64>,
    pub sigma: Option<f64>,
    pub tau: Option<f64>,
    pub speed_factor: Option<f64>,
    pub speed_dev: Option<f64>,
    pub impatience: Option<f64>,
}

impl VehicleTypeParams {
    /// Values set in `overrides` win.
    pub fn merge(&self, overrides: &VehicleTypeParams) -> VehicleTypeParams {
        VehicleTypeParams {
            min_gap: overrides.min_gap.or(self.min_gap),
            accel: overrides.accel.or(self.accel),
            decel: overrides.decel.or(self.decel),
            sigma: overrides.sigma.or(self.sigma),
            tau: overrides.tau.or(self.tau),
            speed_factor: overrides.speed_factor.or(self.speed_factor),
            speed_dev: overrides.speed_dev.or(self.speed_dev),
            impatience: overrides.impatience.or(self.impatience),
        }
    }
}

/// A named vehicle mix together with optional behaviour overrides per class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixProfile {
    pub name: String,
    pub shares: VehicleShares,
    #[serde(default)]
    pub conventional: VehicleTypeParams,
    #[serde(default)]
    pub automated: VehicleTypeParams,
    #[serde(default)]
    pub connected_automated: VehicleTypeParams,
}

impl MixProfile {
    pub fn from_shares(name: impl Into<String>, shares: VehicleShares) -> Self {
        MixProfile {
            name: name.into(),
            shares,
            conventional: VehicleTypeParams::default(),
            automated: VehicleTypeParams::default(),
            connected_automated: VehicleTypeParams::default(),
        }
    }

    fn overrides(&self, class: VehicleClass) -> &VehicleTypeParams {
        match class {
            VehicleClass::Conventional => &self.conventional,
            VehicleClass::Automated => &self.automated,
            VehicleClass::ConnectedAutomated => &self.connected_automated,
        }
    }

    pub fn distribution(&self) -> Result<VehicleTypeDistribution, ConfigError> {
        let mix = self.shares.normalize()?;
        let types = VehicleClass::ALL
            .iter()
            .map(|class| {
                let params = class.default_params().merge(self.overrides(*class));
                VehicleType {
                    id: class.type_id().to_string(),
                    probability: mix.weight(*class),
                    color: class.color().to_string(),
                    v_class: "passenger".to_string(),
                    min_gap: params.min_gap,
                    accel: params.accel,
                    decel: params.decel,
                    sigma: params.sigma,
                    tau: params.tau,
                    speed_factor: params.speed_factor,
                    speed_dev: params.speed_dev,
                    impatience: params.impatience,
                }
            })
            .collect();

        Ok(VehicleTypeDistribution {
            id: DISTRIBUTION_ID.to_string(),
            types,
        })
    }
}

pub const DISTRIBUTION_ID: &str = "vDist";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename = "routes")]
pub struct Routes {
    #[serde(rename = "vTypeDistribution")]
    pub distribution: VehicleTypeDistribution,
    #[serde(rename = "flow")]
    pub flows: Vec<Flow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleTypeDistribution {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "vType")]
    pub types: Vec<VehicleType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleType {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@probability")]
    pub probability: f64,
    #[serde(rename = "@color")]
    pub color: String,
    #[serde(rename = "@vClass")]
    pub v_class: String,
    #[serde(rename = "@minGap", skip_serializing_if = "Option::is_none")]
    pub min_gap: Option<f64>,
    #[serde(rename = "@accel", skip_serializing_if = "Option::is_none")]
    pub accel: Option<f64>,
    #[serde(rename = "@decel", skip_serializing_if = "Option::is_none")]
    pub decel: Option<f64>,
    #[serde(rename = "@sigma", skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
    #[serde(rename = "@tau", skip_serializing_if = "Option::is_none")]
    pub tau: Option<f64>,
    #[serde(rename = "@speedFactor", skip_serializing_if = "Option::is_none")]
    pub speed_factor: Option<f64>,
    #[serde(rename = "@speedDev", skip_serializing_if = "Option::is_none")]
    pub speed_dev: Option<f64>,
    #[serde(rename = "@impatience", skip_serializing_if = "Option::is_none")]
    pub impatience: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Flow {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@begin")]
    pub begin: u32,
    #[serde(rename = "@end")]
    pub end: u32,
    #[serde(rename = "@vehsPerHour")]
    pub vehs_per_hour: f64,
    #[serde(rename = "@type")]
    pub vehicle_type: String,
    #[serde(rename = "@departLane")]
    pub depart_lane: String,
    #[serde(rename = "@arrivalLane")]
    pub arrival_lane: String,
    #[serde(rename = "@departSpeed")]
    pub depart_speed: String,
    pub route: Route,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    /// Space separated edge ids, driven in order.
    #[serde(rename = "@edges")]
    pub edges: String,
}

impl Flow {
    /// Flow drawing from the vehicle type distribution, entering on the best lane at maximum
    /// speed and staying on its lane until the end of the route.
    pub fn new(id: impl Into<String>, duration: u32, vehs_per_hour: f64, edges: String) -> Self {
        Flow {
            id: id.into(),
            begin: 0,
            end: duration,
            vehs_per_hour: (vehs_per_hour * 100.).round() / 100.,
            vehicle_type: DISTRIBUTION_ID.to_string(),
            depart_lane: "best".to_string(),
            arrival_lane: "current".to_string(),
            depart_speed: "max".to_string(),
            route: Route { edges },
        }
    }
}

pub fn routes(profile: &MixProfile, flows: Vec<Flow>) -> Result<Routes, ConfigError> {
    Ok(Routes {
        distribution: profile.distribution()?,
        flows,
    })
}
