//! Application settings sync.
//!
//! The cloud settings object is merged field by field through
//! [`SETTING_FIELDS`]. A local value is only overwritten when the cloud
//! provides one and it differs, so fields the cloud does not track keep
//! their local value.

use tracing::{debug, info};

use fleetsync_types::AppSettings;

use crate::cloud::{CloudClient, CloudSettings};
use crate::context::SyncContext;
use crate::error::Result;
use crate::local::SettingsRepository;

/// One independently merged setting.
pub struct SettingField {
    pub name: &'static str,
    /// Whether the cloud provides a value that differs from the local one.
    pub differs: fn(&CloudSettings, &AppSettings) -> bool,
    /// Copy the cloud value into the local settings.
    pub apply: fn(&CloudSettings, &mut AppSettings),
}

impl std::fmt::Debug for SettingField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SettingField").field(&self.name).finish()
    }
}

macro_rules! setting_field {
    ($field:ident) => {
        SettingField {
            name: stringify!($field),
            differs: |cloud, local| cloud.$field.as_ref().is_some_and(|v| *v != local.$field),
            apply: |cloud, local| {
                if let Some(v) = &cloud.$field {
                    local.$field = v.clone();
                }
            },
        }
    };
    (optional $field:ident) => {
        SettingField {
            name: stringify!($field),
            differs: |cloud, local| cloud.$field.is_some() && cloud.$field != local.$field,
            apply: |cloud, local| {
                if cloud.$field.is_some() {
                    local.$field = cloud.$field.clone();
                }
            },
        }
    };
}

/// Every setting synced from the cloud.
pub static SETTING_FIELDS: &[SettingField] = &[
    setting_field!(temperature_unit),
    setting_field!(temperature_accuracy),
    setting_field!(humidity_unit),
    setting_field!(humidity_accuracy),
    setting_field!(pressure_unit),
    setting_field!(pressure_accuracy),
    setting_field!(chart_show_all_points),
    setting_field!(chart_draw_dots),
    setting_field!(chart_duration_days),
    setting_field!(chart_show_min_max_avg),
    setting_field!(cloud_mode_enabled),
    setting_field!(dashboard_enabled),
    setting_field!(dashboard_type),
    setting_field!(dashboard_tap_action),
    setting_field!(email_alerts_disabled),
    setting_field!(push_alerts_disabled),
    setting_field!(marketing_preference),
    setting_field!(optional profile_language_code),
];

/// Merge cloud settings into local ones.
///
/// Returns the merged settings and the names of the fields that changed.
pub fn merge_settings(cloud: &CloudSettings, local: &AppSettings) -> (AppSettings, Vec<&'static str>) {
    let mut merged = local.clone();
    let mut changed = Vec::new();
    for field in SETTING_FIELDS {
        if (field.differs)(cloud, &merged) {
            (field.apply)(cloud, &mut merged);
            changed.push(field.name);
        }
    }
    (merged, changed)
}

/// Pulls account settings from the cloud.
pub struct SettingsSync<'a> {
    ctx: &'a SyncContext,
}

impl<'a> SettingsSync<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Fetch and merge. Returns the names of the fields that changed.
    pub async fn run(&self) -> Result<Vec<&'static str>> {
        let cloud = self.ctx.cloud.get_settings().await?;
        let local = self.ctx.store.load_app_settings().await?;

        let (merged, changed) = merge_settings(&cloud, &local);
        if changed.is_empty() {
            debug!("Settings already up to date");
        } else {
            self.ctx.store.save_app_settings(&merged).await?;
            info!("Updated settings from cloud: {}", changed.join(", "));
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockCloudClient;
    use crate::test_support::harness;
    use fleetsync_types::{DashboardType, PressureUnit, TemperatureUnit};

    #[test]
    fn test_every_field_is_listed_once() {
        let mut names: Vec<_> = SETTING_FIELDS.iter().map(|f| f.name).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(total, 18);
    }

    #[test]
    fn test_absent_cloud_values_keep_local() {
        let local = AppSettings {
            temperature_unit: TemperatureUnit::Fahrenheit,
            profile_language_code: Some("fi".to_string()),
            ..Default::default()
        };
        let (merged, changed) = merge_settings(&CloudSettings::default(), &local);
        assert!(changed.is_empty());
        assert_eq!(merged, local);
    }

    #[test]
    fn test_only_differing_fields_change() {
        let local = AppSettings::default();
        let cloud = CloudSettings {
            pressure_unit: Some(PressureUnit::Hectopascal),
            dashboard_type: Some(DashboardType::Simple),
            chart_duration_days: Some(30),
            profile_language_code: Some("de".to_string()),
            ..Default::default()
        };

        let (merged, changed) = merge_settings(&cloud, &local);
        assert_eq!(
            changed,
            vec!["chart_duration_days", "dashboard_type", "profile_language_code"]
        );
        assert_eq!(merged.chart_duration_days, 30);
        assert_eq!(merged.dashboard_type, DashboardType::Simple);
        assert_eq!(merged.profile_language_code.as_deref(), Some("de"));
        assert_eq!(merged.pressure_unit, PressureUnit::Hectopascal);
    }

    #[test]
    fn test_each_field_merges_independently() {
        let cloud = CloudSettings {
            temperature_unit: Some(TemperatureUnit::Kelvin),
            cloud_mode_enabled: Some(true),
            marketing_preference: Some(true),
            ..Default::default()
        };
        for field in SETTING_FIELDS {
            let mut local = AppSettings::default();
            let differs = (field.differs)(&cloud, &local);
            (field.apply)(&cloud, &mut local);
            let expected = matches!(
                field.name,
                "temperature_unit" | "cloud_mode_enabled" | "marketing_preference"
            );
            assert_eq!(differs, expected, "{}", field.name);
            assert!(!(field.differs)(&cloud, &local), "{}", field.name);
        }
    }

    #[tokio::test]
    async fn test_sync_saves_only_on_change() {
        let cloud = MockCloudClient::builder()
            .settings(CloudSettings {
                cloud_mode_enabled: Some(true),
                ..Default::default()
            })
            .build();
        let h = harness(cloud);

        let changed = SettingsSync::new(&h.ctx).run().await.unwrap();
        assert_eq!(changed, vec!["cloud_mode_enabled"]);
        assert!(h.store.load_app_settings().await.unwrap().cloud_mode_enabled);

        let again = SettingsSync::new(&h.ctx).run().await.unwrap();
        assert!(again.is_empty());
    }
}
