use super::{Relu, Sigmoid};

/// An element-wise activation function applied at the output of a layer.
#[derive(Clone, Debug)]
pub enum ActFn {
    Sigmoid(Sigmoid),
    Relu(Relu),
}
impl ActFn {
    pub fn sigmoid(amp: f32) -> Self {
        ActFn::Sigmoid(Sigmoid::new(amp))
    }

    pub fn relu() -> Self {
        ActFn::Relu(Relu)
    }

    pub fn f(&self, x: f32) -> f32 {
        match self {
            ActFn::Sigmoid(a) => a.f(x),
            ActFn::Relu(a) => a.f(x),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            ActFn::Sigmoid(a) => a.df(x),
            ActFn::Relu(a) => a.df(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_to_the_wrapped_function() {
        let relu = ActFn::relu();
        assert_eq!(relu.f(-2.0), 0.0);
        assert_eq!(relu.f(3.0), 3.0);
        assert_eq!(relu.df(3.0), 1.0);

        let sigmoid = ActFn::sigmoid(1.0);
        assert!((sigmoid.f(0.0) - 0.5).abs() < 1e-6);
        assert!((sigmoid.df(0.0) - 0.25).abs() < 1e-6);
    }
}
