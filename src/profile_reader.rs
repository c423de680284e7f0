//! Recipe files and the built-in profiles.
//!
//! A recipe is a JSON document holding the anchor points and, optionally,
//! the PID parameters:
//!
//! ```json
//! {"profile":[{"x":0,"y":25},{"x":90,"y":150}],"pid_param":{"kp":10,"ki":0.1,"kd":18,"dt":1}}
//! ```

use heapless::Vec;
use serde::Deserialize;

use crate::log::*;
use crate::pid::PidParams;
use crate::profile::AnchorPoint;
use crate::Error;

pub const MAX_ANCHORS: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct RecipeFile {
    pub profile: Vec<AnchorPoint, MAX_ANCHORS>,
    #[serde(default)]
    pub pid_param: Option<PidParams>,
}

impl RecipeFile {
    /// Parameters from the file, or the defaults when it has none.
    pub fn params(&self) -> PidParams {
        self.pid_param.unwrap_or_default()
    }
}

pub fn parse_recipe(text: &str) -> Result<RecipeFile, Error> {
    let (recipe, _) = serde_json_core::from_str::<RecipeFile>(text).map_err(|e| {
        warn!("Recipe parse error: {:?}", e);
        Error::Recipe("malformed json")
    })?;

    if recipe.profile.is_empty() {
        return Err(Error::Recipe("no profile provided"));
    }
    if let Some(params) = recipe.pid_param {
        params.validate()?;
    }
    Ok(recipe)
}

const LEAD_FREE: &[AnchorPoint] = &[
    AnchorPoint::new(0, 25.0),
    AnchorPoint::new(90, 150.0),
    AnchorPoint::new(180, 180.0),
    AnchorPoint::new(210, 217.0),
    AnchorPoint::new(240, 245.0),
    AnchorPoint::new(270, 217.0),
    AnchorPoint::new(330, 50.0),
];

const LEADED: &[AnchorPoint] = &[
    AnchorPoint::new(0, 25.0),
    AnchorPoint::new(180, 100.0),
    AnchorPoint::new(270, 150.0),
    AnchorPoint::new(300, 183.0),
    AnchorPoint::new(330, 215.0),
    AnchorPoint::new(360, 183.0),
    AnchorPoint::new(420, 50.0),
];

const LOW_TEMP: &[AnchorPoint] = &[
    AnchorPoint::new(0, 25.0),
    AnchorPoint::new(45, 80.0),
    AnchorPoint::new(105, 120.0),
    AnchorPoint::new(135, 150.0),
    AnchorPoint::new(165, 180.0),
    AnchorPoint::new(195, 150.0),
    AnchorPoint::new(255, 50.0),
];

pub const BUILTIN_PROFILES: [&str; 3] = ["lead_free", "leaded", "low_temp"];

/// Look up a built-in profile by name.
pub fn builtin_profile(name: &str) -> Option<&'static [AnchorPoint]> {
    match name {
        "lead_free" => Some(LEAD_FREE),
        "leaded" => Some(LEADED),
        "low_temp" => Some(LOW_TEMP),
        _ => {
            error!("Profile not found: {}", name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile;

    #[test]
    fn parses_profile_and_params() {
        let text = r#"{"profile":[{"x":0,"y":25},{"x":60,"y":150.5}],"pid_param":{"kp":12,"ki":0.2,"kd":5,"dt":0.5}}"#;
        let recipe = parse_recipe(text).unwrap();

        assert_eq!(recipe.profile.len(), 2);
        assert_eq!(recipe.profile[1], AnchorPoint::new(60, 150.5));
        assert_eq!(
            recipe.params(),
            PidParams {
                kp: 12.0,
                ki: 0.2,
                kd: 5.0,
                dt: 0.5
            }
        );
    }

    #[test]
    fn missing_params_fall_back_to_defaults() {
        let recipe = parse_recipe(r#"{"profile":[{"time":0,"temp":20},{"time":10,"temp":200}]}"#)
            .unwrap();
        assert_eq!(recipe.params(), PidParams::default());
        assert_eq!(recipe.profile[1].temperature, 200.0);
    }

    #[test]
    fn rejects_empty_and_malformed_recipes() {
        assert_eq!(
            parse_recipe(r#"{"profile":[]}"#).unwrap_err(),
            Error::Recipe("no profile provided")
        );
        assert_eq!(
            parse_recipe(r#"{"profile":[{"x":0,"y":}]}"#).unwrap_err(),
            Error::Recipe("malformed json")
        );
        assert!(matches!(
            parse_recipe(r#"{"profile":[{"x":0,"y":1}],"pid_param":{"kp":1,"ki":1,"kd":1,"dt":0}}"#),
            Err(Error::InvalidParams(_))
        ));
    }

    #[test]
    fn builtin_profiles_are_valid() {
        for name in BUILTIN_PROFILES {
            let anchors = builtin_profile(name).unwrap();
            let setpoints = profile::interpolate(anchors, 1.0).unwrap();
            assert_eq!(
                setpoints.len(),
                anchors.last().unwrap().time as usize
            );
        }
        assert!(builtin_profile("lead_free.txt").is_none());
    }
}
