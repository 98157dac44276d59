use crate::conf::{
    DevAttributes,
    DevConfig,
};
use crate::errors::Error;
use crate::model::profiles::ModelTable;
use crate::transport::base::TransportKind;
use chrono::offset::Utc;
use chrono::DateTime;
use core::time::Duration;
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;

/// `Device` is one fleet member: identity, endpoint, credentials, the model
/// attributes driving its dialogue, and runtime bookkeeping.
///
/// Invariant: when `last_status` is true, `last_success == last_try`.
#[derive(Debug, Clone)]
pub struct Device {
    /// Unique device id.
    pub id: String,
    /// Model name the attributes came from.
    pub model: String,
    /// Endpoint as "host:port".
    pub host_port: String,
    /// Acceptable transports in priority order.
    pub transports: Vec<TransportKind>,
    /// Login username.
    pub login_user: String,
    /// Login password.
    pub login_password: String,
    /// Enable-mode password.
    pub enable_password: String,
    /// Deletion tombstone.
    pub deleted: bool,
    /// Per-device debug logging.
    pub debug: bool,
    /// Dialogue attributes (model defaults, possibly overridden per device).
    pub attr: DevAttributes,
    /// When the device was last attempted.
    pub last_try: Option<DateTime<Utc>>,
    /// When the device was last fetched successfully.
    pub last_success: Option<DateTime<Utc>>,
    /// How long the last attempt took.
    pub last_elapsed: Duration,
    /// Whether the last attempt succeeded.
    pub last_status: bool,
}

impl Device {
    /// Builds a runtime device from its persistent record, resolving the
    /// transport list.
    pub fn from_config(cfg: &DevConfig) -> Result<Self, Error> {
        Ok(Self {
            id: cfg.id.clone(),
            model: cfg.model.clone(),
            host_port: cfg.host_port.clone(),
            transports: TransportKind::parse_list(&cfg.transports)
                .map_err(|err| err.context(&cfg.id))?,
            login_user: cfg.login_user.clone(),
            login_password: cfg.login_password.clone(),
            enable_password: cfg.enable_password.clone(),
            deleted: cfg.deleted,
            debug: cfg.debug,
            attr: cfg.attr.clone(),
            last_try: None,
            last_success: None,
            last_elapsed: Duration::ZERO,
            last_status: false,
        })
    }

    /// Remaining time until this device is due again: the positive remainder
    /// of `last_success + holdtime - now`, or zero when already due. A device
    /// whose last attempt failed is always due.
    pub fn holdtime(
        &self,
        now: DateTime<Utc>,
        holdtime: Duration,
    ) -> Duration {
        if !self.last_status {
            return Duration::ZERO;
        }

        let Some(last_success) = self.last_success else {
            return Duration::ZERO;
        };

        let Ok(hold) = chrono::Duration::from_std(holdtime) else {
            return Duration::ZERO;
        };

        (last_success + hold - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// `DeviceTable` is the in-memory index of device records. A single lock
/// guards it; every operation is short, and [`DeviceTable::list_devices`]
/// hands out a defensive copy so the scanner iterates without holding the
/// lock.
#[derive(Default)]
pub struct DeviceTable {
    devices: Mutex<HashMap<String, Device>>,
}

impl DeviceTable {
    /// Returns an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device, rejecting duplicate ids.
    #[allow(clippy::expect_used)]
    pub fn add_device(
        &self,
        device: Device,
    ) -> Result<(), Error> {
        let mut table = self.devices.lock().expect("device table lock poisoned");

        if table.contains_key(&device.id) {
            return Err(Error::Config(format!("duplicate device id '{}'", device.id)));
        }

        debug!("device table: added {}", device.id);

        table.insert(device.id.clone(), device);

        Ok(())
    }

    /// Returns a copy of the device, or a config error when the id is
    /// unknown.
    #[allow(clippy::expect_used)]
    pub fn get_device(
        &self,
        id: &str,
    ) -> Result<Device, Error> {
        self.devices
            .lock()
            .expect("device table lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("device '{id}' not found")))
    }

    /// Replaces the stored record for `device.id`.
    #[allow(clippy::expect_used)]
    pub fn update_device(
        &self,
        device: Device,
    ) -> Result<(), Error> {
        let mut table = self.devices.lock().expect("device table lock poisoned");

        if !table.contains_key(&device.id) {
            return Err(Error::Config(format!("device '{}' not found", device.id)));
        }

        table.insert(device.id.clone(), device);

        Ok(())
    }

    /// Tombstones the device. The record and its bookkeeping survive so a
    /// re-add starts from known history.
    #[allow(clippy::expect_used)]
    pub fn delete_device(
        &self,
        id: &str,
    ) -> Result<(), Error> {
        self.devices
            .lock()
            .expect("device table lock poisoned")
            .get_mut(id)
            .map(|d| d.deleted = true)
            .ok_or_else(|| Error::Config(format!("device '{id}' not found")))
    }

    /// Snapshot of every record, tombstoned ones included. The copy is the
    /// scanner's to iterate.
    #[allow(clippy::expect_used)]
    pub fn list_devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .lock()
            .expect("device table lock poisoned")
            .values()
            .cloned()
            .collect();

        devices.sort_by(|a, b| a.id.cmp(&b.id));

        devices
    }

    /// Records the outcome of a fetch attempt, maintaining the
    /// `last_status => last_success == last_try` invariant.
    pub fn update_status(
        &self,
        id: &str,
        good: bool,
        last: DateTime<Utc>,
        elapsed: Duration,
    ) {
        let Ok(mut device) = self.get_device(id) else {
            debug!("update_status: device '{id}' vanished");
            return;
        };

        device.last_try = Some(last);
        device.last_elapsed = elapsed;
        device.last_status = good;
        if good {
            device.last_success = device.last_try;
        }

        let _ = self.update_device(device);
    }
}

/// Builds a device from a model profile plus endpoint and credentials, and
/// adds it to the table.
#[allow(clippy::too_many_arguments)]
pub fn create_device(
    tab: &DeviceTable,
    models: &ModelTable,
    model: &str,
    id: &str,
    host_port: &str,
    transports: &str,
    login_user: &str,
    login_password: &str,
    enable_password: &str,
    debug: bool,
) -> Result<(), Error> {
    let attr = models
        .get(model)
        .ok_or_else(|| Error::Config(format!("unknown model '{model}'")))?;

    let cfg = DevConfig {
        model: model.to_owned(),
        id: id.to_owned(),
        host_port: host_port.to_owned(),
        transports: transports.to_owned(),
        login_user: login_user.to_owned(),
        login_password: login_password.to_owned(),
        enable_password: enable_password.to_owned(),
        debug,
        attr,
        ..DevConfig::default()
    };

    tab.add_device(Device::from_config(&cfg)?)
}

#[cfg(test)]
mod tests {
    use super::{
        create_device,
        Device,
        DeviceTable,
    };
    use crate::conf::DevConfig;
    use crate::model::profiles::ModelTable;
    use chrono::offset::Utc;
    use core::time::Duration;

    fn test_device(id: &str) -> Device {
        Device::from_config(&DevConfig {
            id: id.to_owned(),
            model: String::from("cisco-ios"),
            host_port: String::from("localhost:2001"),
            transports: String::from("telnet"),
            ..DevConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn duplicate_id_rejected() {
        let tab = DeviceTable::new();

        tab.add_device(test_device("lab1")).unwrap();
        assert!(tab.add_device(test_device("lab1")).is_err());
        assert_eq!(tab.list_devices().len(), 1);
    }

    #[test]
    fn delete_preserves_bookkeeping() {
        let tab = DeviceTable::new();
        tab.add_device(test_device("lab1")).unwrap();

        let now = Utc::now();
        tab.update_status("lab1", true, now, Duration::from_secs(3));
        tab.delete_device("lab1").unwrap();

        let d = tab.get_device("lab1").unwrap();
        assert!(d.deleted);
        assert!(d.last_status);
        assert_eq!(d.last_success, Some(now));
        assert_eq!(d.last_elapsed, Duration::from_secs(3));
    }

    #[test]
    fn status_invariant() {
        let tab = DeviceTable::new();
        tab.add_device(test_device("lab1")).unwrap();

        let t0 = Utc::now();
        tab.update_status("lab1", true, t0, Duration::from_secs(1));
        let d = tab.get_device("lab1").unwrap();
        assert_eq!(d.last_success, d.last_try);

        // a failure moves last_try but not last_success
        let t1 = t0 + chrono::Duration::seconds(60);
        tab.update_status("lab1", false, t1, Duration::from_secs(1));
        let d = tab.get_device("lab1").unwrap();
        assert_eq!(d.last_try, Some(t1));
        assert_eq!(d.last_success, Some(t0));
        assert!(!d.last_status);
    }

    #[test]
    fn holdtime_math() {
        let mut d = test_device("lab1");
        let hold = Duration::from_secs(3600);
        let now = Utc::now();

        // never tried: due
        assert_eq!(d.holdtime(now, hold), Duration::ZERO);

        // fresh success: gated for the remainder
        d.last_status = true;
        d.last_success = Some(now - chrono::Duration::seconds(600));
        let remaining = d.holdtime(now, hold);
        assert_eq!(remaining, Duration::from_secs(3000));

        // holdtime expired: due
        d.last_success = Some(now - chrono::Duration::seconds(7200));
        assert_eq!(d.holdtime(now, hold), Duration::ZERO);

        // failed last attempt: always due, gating be damned
        d.last_status = false;
        d.last_success = Some(now);
        assert_eq!(d.holdtime(now, hold), Duration::ZERO);
    }

    #[test]
    fn list_is_a_snapshot() {
        let tab = DeviceTable::new();
        tab.add_device(test_device("lab1")).unwrap();

        let snapshot = tab.list_devices();
        tab.delete_device("lab1").unwrap();

        assert!(!snapshot[0].deleted);
    }

    #[test]
    fn create_from_model_profile() {
        let tab = DeviceTable::new();
        let models = ModelTable::with_builtin_models();

        create_device(
            &tab,
            &models,
            "cisco-ios",
            "lab1",
            "localhost:2001",
            "telnet",
            "lab",
            "pass",
            "en",
            false,
        )
        .unwrap();

        let d = tab.get_device("lab1").unwrap();
        assert!(d.attr.need_login_chat);
        assert!(d.attr.need_enabled_mode);

        assert!(create_device(
            &tab,
            &models,
            "no-such-model",
            "lab2",
            "localhost:2001",
            "telnet",
            "",
            "",
            "",
            false,
        )
        .is_err());
    }
}
