use crate::log::*;

/// The solid-state relay in front of the heating element.
///
/// Switching is fire-and-forget; implementations must not fail.
pub trait Heater {
    fn set_power(&mut self, on: bool);
}

impl<T: Heater + ?Sized> Heater for &mut T {
    fn set_power(&mut self, on: bool) {
        (**self).set_power(on)
    }
}

/// Owns the heater for the duration of a run and switches it off when
/// dropped, whichever way the run ends.
pub struct HeaterGuard<H: Heater> {
    heater: H,
    on: bool,
}

impl<H: Heater> HeaterGuard<H> {
    pub fn new(mut heater: H) -> Self {
        heater.set_power(false);
        Self { heater, on: false }
    }

    pub fn on(&mut self) {
        self.heater.set_power(true);
        self.on = true;
    }

    pub fn off(&mut self) {
        self.heater.set_power(false);
        self.on = false;
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}

impl<H: Heater> Drop for HeaterGuard<H> {
    fn drop(&mut self) {
        if self.on {
            warn!("Heater still on at end of run, forcing off");
        }
        self.heater.set_power(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Relay {
        levels: Vec<bool>,
    }

    impl Heater for Relay {
        fn set_power(&mut self, on: bool) {
            self.levels.push(on);
        }
    }

    #[test]
    fn guard_switches_off_on_drop() {
        let mut relay = Relay::default();
        {
            let mut guard = HeaterGuard::new(&mut relay);
            guard.on();
            assert!(guard.is_on());
        }
        assert_eq!(relay.levels, vec![false, true, false]);
    }

    #[test]
    fn guard_switches_off_on_unwind() {
        let mut relay = Relay::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut guard = HeaterGuard::new(&mut relay);
            guard.on();
            panic!("tick blew up");
        }));
        assert!(result.is_err());
        assert_eq!(relay.levels.last(), Some(&false));
    }
}
