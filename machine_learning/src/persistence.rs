//! Safetensors files for model parameters and datasets.
//!
//! Models are stored as `layers.{i}.weight` (`[inputs, outputs]`) and `layers.{i}.bias`
//! (`[outputs]`) tensors, datasets as `x` (`[samples, features]`), `y` (`[samples]`) and
//! `classes` (`[1]`).

use std::{fs, path::Path};

use log::debug;
use ndarray::Array2;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{
    MlErr, Result,
    arch::{Model, Sequential},
    dataset::Dataset,
};

/// Writes the model's parameters to `path`.
pub fn save_model(model: &Sequential, path: &Path) -> Result<()> {
    let mut tensors = Vec::with_capacity(2 * model.layers().len());

    for (i, (layer, params)) in model.layer_params().enumerate() {
        let (inputs, outputs) = layer.dim();
        let (w, b) = params.split_at(inputs * outputs);

        tensors.push((
            format!("layers.{i}.weight"),
            TensorView::new(Dtype::F32, vec![inputs, outputs], bytemuck::cast_slice(w))?,
        ));
        tensors.push((
            format!("layers.{i}.bias"),
            TensorView::new(Dtype::F32, vec![outputs], bytemuck::cast_slice(b))?,
        ));
    }

    write_atomically(tensors, path)?;
    debug!(params = model.size(); "saved model to {}", path.display());
    Ok(())
}

/// Loads parameters saved by `save_model` into a model of the same architecture.
pub fn load_model_params(model: &mut Sequential, path: &Path) -> Result<()> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;
    let mut params = Vec::with_capacity(model.size());

    for (i, layer) in model.layers().iter().enumerate() {
        let (inputs, outputs) = layer.dim();
        params.extend(read_f32(&tensors, &format!("layers.{i}.weight"), &[inputs, outputs])?);
        params.extend(read_f32(&tensors, &format!("layers.{i}.bias"), &[outputs])?);
    }

    model.params_mut().copy_from_slice(&params);
    Ok(())
}

/// Writes the dataset to `path`.
pub fn save_dataset(dataset: &Dataset, path: &Path) -> Result<()> {
    let x: Vec<f32> = dataset.x().iter().copied().collect();
    let y: Vec<i64> = dataset.labels().iter().map(|&label| label as i64).collect();
    let classes = [dataset.classes() as i64];

    let tensors = [
        (
            "x",
            TensorView::new(
                Dtype::F32,
                vec![dataset.len(), dataset.features()],
                bytemuck::cast_slice(&x),
            )?,
        ),
        (
            "y",
            TensorView::new(Dtype::I64, vec![dataset.len()], bytemuck::cast_slice(&y))?,
        ),
        (
            "classes",
            TensorView::new(Dtype::I64, vec![1], bytemuck::cast_slice(&classes))?,
        ),
    ];

    write_atomically(tensors, path)?;
    debug!(samples = dataset.len(); "saved dataset to {}", path.display());
    Ok(())
}

/// Reads a dataset written by `save_dataset`.
pub fn load_dataset(path: &Path) -> Result<Dataset> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let y_view = tensors.tensor("y")?;
    let samples = y_view.shape().first().copied().unwrap_or_default();
    let y = read_i64(&tensors, "y", &[samples])?
        .into_iter()
        .map(to_index)
        .collect::<Result<Vec<_>>>()?;

    let features = tensors.tensor("x")?.shape().get(1).copied().unwrap_or_default();
    let x = read_f32(&tensors, "x", &[samples, features])?;
    let x = Array2::from_shape_vec((samples, features), x)
        .map_err(|e| MlErr::InvalidInput(e.to_string()))?;

    let classes = to_index(read_i64(&tensors, "classes", &[1])?[0])?;
    Dataset::new(x, y, classes)
}

fn write_atomically<'a, S, I>(tensors: I, path: &Path) -> Result<()>
where
    S: AsRef<str> + Ord + std::fmt::Display,
    I: IntoIterator<Item = (S, TensorView<'a>)>,
{
    let bytes = safetensors::serialize(tensors, &None)?;

    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    let tmp = path.with_extension("partial");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn checked_view<'a>(
    tensors: &'a SafeTensors<'a>,
    name: &str,
    dtype: Dtype,
    shape: &[usize],
) -> Result<TensorView<'a>> {
    let view = tensors.tensor(name)?;

    if view.dtype() != dtype {
        return Err(MlErr::InvalidInput(format!(
            "tensor {name} has dtype {:?}, expected {dtype:?}",
            view.dtype()
        )));
    }

    if view.shape() != shape {
        return Err(MlErr::InvalidInput(format!(
            "tensor {name} has shape {:?}, expected {shape:?}",
            view.shape()
        )));
    }

    Ok(view)
}

fn read_f32(tensors: &SafeTensors<'_>, name: &str, shape: &[usize]) -> Result<Vec<f32>> {
    let view = checked_view(tensors, name, Dtype::F32, shape)?;

    Ok(view
        .data()
        .chunks_exact(size_of::<f32>())
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn read_i64(tensors: &SafeTensors<'_>, name: &str, shape: &[usize]) -> Result<Vec<i64>> {
    let view = checked_view(tensors, name, Dtype::I64, shape)?;

    Ok(view
        .data()
        .chunks_exact(size_of::<i64>())
        .map(|b| {
            let mut raw = [0; 8];
            raw.copy_from_slice(b);
            i64::from_le_bytes(raw)
        })
        .collect())
}

fn to_index(value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| MlErr::InvalidInput(format!("negative label {value}")))
}
