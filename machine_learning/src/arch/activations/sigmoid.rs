/// The logistic function scaled by `amp`.
#[derive(Clone, Debug)]
pub struct Sigmoid {
    amp: f32,
}

impl Sigmoid {
    pub fn new(amp: f32) -> Self {
        Self { amp }
    }

    pub fn f(&self, z: f32) -> f32 {
        self.amp / (1. + (-z).exp())
    }

    pub fn df(&self, z: f32) -> f32 {
        let s = 1. / (1. + (-z).exp());
        self.amp * s * (1. - s)
    }
}

impl Default for Sigmoid {
    fn default() -> Self {
        Self::new(1.)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivative_matches_finite_difference() {
        let sigmoid = Sigmoid::new(2.0);
        let h = 1e-3;

        for z in [-3.0_f32, -0.5, 0.0, 1.2, 4.0] {
            let numeric = (sigmoid.f(z + h) - sigmoid.f(z - h)) / (2. * h);
            assert!((numeric - sigmoid.df(z)).abs() < 1e-3, "z = {z}");
        }
    }

    #[test]
    fn large_inputs_do_not_overflow() {
        let sigmoid = Sigmoid::default();

        assert_eq!(sigmoid.f(-200.0), 0.0);
        assert_eq!(sigmoid.f(200.0), 1.0);
        assert!(sigmoid.df(-200.0).is_finite());
    }
}
