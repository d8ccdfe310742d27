//! Dispatchable task descriptions and their deferred shape resolution.
//!
//! Building a task and resolving it are separate phases. A
//! [`ComputeTaskDescriptor`] is assembled once per graph compilation and only
//! names its buffers by [`ValueId`]. Once the surrounding pipeline knows the
//! concrete shapes it calls [`ComputeTaskDescriptor::resolve`] with a
//! [`ShapeMap`]; this may happen any number of times.

use crate::kernels::dispatch::DispatchSize;
use crate::kernels::fusion::FusionFragment;
use crate::kernels::shader::{link_shader, shader_defines};
use crate::shape::{Bhwc, ShapeMap, ValueId};

use dwconv_utils::{Phase, RuntimeOptions, timing_guard};
use log::Level;
use serde::Serialize;
use std::{fmt, sync::Arc};
use thiserror::Error;

/// Failure to resolve a task against a shape map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no shape was provided for buffer {id}")]
    MissingShape { id: ValueId },
    #[error("cannot infer the shape of buffer {id}: {reason}")]
    ShapeInference { id: ValueId, reason: String },
}

/// Look up `id` in `shapes`.
pub fn shape_of(shapes: &ShapeMap, id: ValueId) -> Result<Bhwc, ResolveError> {
    shapes
        .get(&id)
        .copied()
        .ok_or(ResolveError::MissingShape { id })
}

pub type OutputShapeFn = Arc<dyn Fn(&ShapeMap) -> Result<Bhwc, ResolveError> + Send + Sync>;
pub type UniformDataFn = Arc<dyn Fn(&ShapeMap) -> Result<Vec<u8>, ResolveError> + Send + Sync>;
pub type ResizeFn = Arc<dyn Fn(&ShapeMap) -> Result<DispatchSize, ResolveError> + Send + Sync>;

/// Read-only input bound by value id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBufferDescriptor {
    pub id: ValueId,
    /// Kernel argument declaration, e.g. `device FLT4* const src_buffer`.
    pub declaration: String,
}

/// Output buffer whose shape is inferred from the resolved inputs.
#[derive(Clone)]
pub struct OutputBufferDescriptor {
    pub id: ValueId,
    pub declaration: String,
    pub dimensions: OutputShapeFn,
}

/// Constant data uploaded once when the task is compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmutableBufferDescriptor {
    pub declaration: String,
    pub data: Vec<u8>,
}

/// Per-dispatch constants computed from resolved shapes.
#[derive(Clone)]
pub struct UniformBufferDescriptor {
    pub declaration: String,
    pub data: UniformDataFn,
}

/// Everything the dispatch pipeline needs to compile and run one kernel.
#[derive(Clone)]
pub struct ComputeTaskDescriptor {
    pub id: u32,
    pub description: String,
    /// Whether this task can itself be folded into a preceding kernel.
    pub is_linkable: bool,
    /// Template source with the three linking slots still in place.
    pub shader_source: String,
    pub input_buffers: Vec<InputBufferDescriptor>,
    pub output_buffer: OutputBufferDescriptor,
    pub immutable_buffers: Vec<ImmutableBufferDescriptor>,
    pub uniform_buffers: Vec<UniformBufferDescriptor>,
    pub resize_function: ResizeFn,
}

impl fmt::Debug for OutputBufferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBufferDescriptor")
            .field("id", &self.id)
            .field("declaration", &self.declaration)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for UniformBufferDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniformBufferDescriptor")
            .field("declaration", &self.declaration)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ComputeTaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeTaskDescriptor")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("is_linkable", &self.is_linkable)
            .field("input_buffers", &self.input_buffers)
            .field("output_buffer", &self.output_buffer)
            .field("immutable_buffers", &self.immutable_buffers.len())
            .field("uniform_buffers", &self.uniform_buffers)
            .finish_non_exhaustive()
    }
}

impl ComputeTaskDescriptor {
    /// Ids whose shapes must be present before [`resolve`](Self::resolve).
    pub fn required_inputs(&self) -> Vec<ValueId> {
        self.input_buffers.iter().map(|buffer| buffer.id).collect()
    }

    /// Entry-point declarations of the task's own buffers.
    ///
    /// Inputs, output, immutable buffers, then uniforms, numbered from
    /// `[[buffer(0)]]` in that order, one comma-terminated line each.
    pub fn binding_arguments(&self) -> String {
        let declarations = self
            .input_buffers
            .iter()
            .map(|buffer| buffer.declaration.as_str())
            .chain(std::iter::once(self.output_buffer.declaration.as_str()))
            .chain(self.immutable_buffers.iter().map(|buffer| buffer.declaration.as_str()))
            .chain(self.uniform_buffers.iter().map(|uniform| uniform.declaration.as_str()));
        declarations
            .enumerate()
            .map(|(index, declaration)| format!("{declaration} [[buffer({index})]],\n"))
            .collect()
    }

    /// Number of `[[buffer(n)]]` slots taken by [`binding_arguments`](Self::binding_arguments).
    ///
    /// Fused fragments number their own arguments from here.
    pub fn binding_count(&self) -> usize {
        self.input_buffers.len() + 1 + self.immutable_buffers.len() + self.uniform_buffers.len()
    }

    /// Complete shader source: type defines, then the template with the task's
    /// bindings and `fragment` linked in.
    pub fn linked_source(&self, options: &RuntimeOptions, fragment: &FusionFragment) -> String {
        let mut source = shader_defines(options);
        source.push_str(&link_shader(
            &self.shader_source,
            &self.binding_arguments(),
            fragment,
        ));
        source
    }

    /// Compute the output shape, uniform contents and dispatch size.
    ///
    /// The output shape is inferred first and added to a copy of `shapes`, so
    /// callers only need to supply the inputs. A shape already present for
    /// the output id is overwritten by the inferred one.
    pub fn resolve(&self, shapes: &ShapeMap) -> Result<ResolvedTask, ResolveError> {
        let _guard = timing_guard(self.id, Phase::Resolve, "", Level::Trace);
        for id in self.required_inputs() {
            shape_of(shapes, id)?;
        }
        let output_shape = (self.output_buffer.dimensions)(shapes)?;
        let mut resolved_shapes = shapes.clone();
        resolved_shapes.insert(self.output_buffer.id, output_shape);

        let uniform_buffers = self
            .uniform_buffers
            .iter()
            .map(|uniform| (uniform.data)(&resolved_shapes))
            .collect::<Result<Vec<_>, _>>()?;
        let dispatch = (self.resize_function)(&resolved_shapes)?;

        Ok(ResolvedTask {
            task_id: self.id,
            output_id: self.output_buffer.id,
            output_shape,
            uniform_buffers,
            dispatch,
        })
    }

    /// Serializable overview of the descriptor phase.
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            description: self.description.clone(),
            is_linkable: self.is_linkable,
            inputs: self
                .input_buffers
                .iter()
                .map(|buffer| BindingSummary {
                    id: Some(buffer.id),
                    declaration: buffer.declaration.clone(),
                    bytes: None,
                })
                .collect(),
            output: BindingSummary {
                id: Some(self.output_buffer.id),
                declaration: self.output_buffer.declaration.clone(),
                bytes: None,
            },
            immutable_buffers: self
                .immutable_buffers
                .iter()
                .map(|buffer| BindingSummary {
                    id: None,
                    declaration: buffer.declaration.clone(),
                    bytes: Some(buffer.data.len()),
                })
                .collect(),
            uniform_buffers: self
                .uniform_buffers
                .iter()
                .map(|uniform| uniform.declaration.clone())
                .collect(),
        }
    }
}

/// Result of resolving a task against concrete shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTask {
    pub task_id: u32,
    pub output_id: ValueId,
    pub output_shape: Bhwc,
    /// Contents of each uniform buffer, in declaration order.
    pub uniform_buffers: Vec<Vec<u8>>,
    pub dispatch: DispatchSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ValueId>,
    pub declaration: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub id: u32,
    pub description: String,
    pub is_linkable: bool,
    pub inputs: Vec<BindingSummary>,
    pub output: BindingSummary,
    pub immutable_buffers: Vec<BindingSummary>,
    pub uniform_buffers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::dispatch::Uint3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn passthrough_task(calls: Arc<AtomicUsize>) -> ComputeTaskDescriptor {
        let input = ValueId(1);
        let output = ValueId(2);
        ComputeTaskDescriptor {
            id: 7,
            description: "passthrough".into(),
            is_linkable: true,
            shader_source: "$0 $1 $2".into(),
            input_buffers: vec![InputBufferDescriptor {
                id: input,
                declaration: "device FLT4* const src_buffer".into(),
            }],
            output_buffer: OutputBufferDescriptor {
                id: output,
                declaration: "device FLT4* dst_buffer".into(),
                dimensions: Arc::new(move |shapes: &ShapeMap| shape_of(shapes, input)),
            },
            immutable_buffers: Vec::new(),
            uniform_buffers: vec![UniformBufferDescriptor {
                declaration: "constant int& size".into(),
                data: Arc::new(move |shapes: &ShapeMap| -> Result<Vec<u8>, ResolveError> {
                    calls.fetch_add(1, Ordering::Relaxed);
                    let shape = shape_of(shapes, output)?;
                    Ok((shape.plane() as i32).to_ne_bytes().to_vec())
                }),
            }],
            resize_function: Arc::new(
                move |shapes: &ShapeMap| -> Result<DispatchSize, ResolveError> {
                    let shape = shape_of(shapes, output)?;
                    Ok(DispatchSize {
                        group_size: Uint3::new(1, 1, 1),
                        groups: Uint3::new(shape.w, shape.h, shape.slices()),
                    })
                },
            ),
        }
    }

    #[test]
    fn resolve_reports_missing_inputs() {
        let task = passthrough_task(Arc::new(AtomicUsize::new(0)));
        let err = task.resolve(&ShapeMap::new()).unwrap_err();
        assert_eq!(err, ResolveError::MissingShape { id: ValueId(1) });
        assert_eq!(err.to_string(), "no shape was provided for buffer #1");
    }

    #[test]
    fn resolve_feeds_inferred_output_to_closures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let task = passthrough_task(calls.clone());
        let shapes = ShapeMap::from([(ValueId(1), Bhwc::new(1, 3, 5, 8))]);

        let first = task.resolve(&shapes).expect("resolve");
        let second = task.resolve(&shapes).expect("resolve again");
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
        assert_eq!(first.output_shape, Bhwc::new(1, 3, 5, 8));
        assert_eq!(first.uniform_buffers, vec![15i32.to_ne_bytes().to_vec()]);
        assert_eq!(first.dispatch.groups, Uint3::new(5, 3, 2));
    }

    #[test]
    fn summary_lists_bindings() {
        let task = passthrough_task(Arc::new(AtomicUsize::new(0)));
        let summary = task.summary();
        assert_eq!(task.required_inputs(), vec![ValueId(1)]);
        assert_eq!(summary.output.id, Some(ValueId(2)));
        assert_eq!(summary.uniform_buffers, vec!["constant int& size".to_string()]);
        assert!(format!("{task:?}").contains("passthrough"));
    }

    #[test]
    fn bindings_are_numbered_in_binding_order() {
        let mut task = passthrough_task(Arc::new(AtomicUsize::new(0)));
        task.immutable_buffers.push(ImmutableBufferDescriptor {
            declaration: "device FLT4* const weights".into(),
            data: vec![0; 16],
        });
        assert_eq!(task.binding_count(), 4);
        assert_eq!(
            task.binding_arguments(),
            "device FLT4* const src_buffer [[buffer(0)]],\n\
             device FLT4* dst_buffer [[buffer(1)]],\n\
             device FLT4* const weights [[buffer(2)]],\n\
             constant int& size [[buffer(3)]],\n"
        );

        let fragment =
            FusionFragment::none().with_argument("device FLT4* const extra [[buffer(4)]]");
        let source = task.linked_source(&RuntimeOptions::default(), &fragment);
        let size = source.find("constant int& size [[buffer(3)]],").unwrap();
        let extra = source.find("device FLT4* const extra [[buffer(4)]],").unwrap();
        assert!(size < extra);
    }
}
