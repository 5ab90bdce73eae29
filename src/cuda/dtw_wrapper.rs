//! CUDA scaffolding for the DTW engine (cost swaths, centroid update).
//!
//! VRAM-first design: sequences are uploaded once per device as an evenly
//! spaced f32 matrix (unified memory, readable from every device), cost
//! columns and step matrices are device-local transients sized to the
//! current alignment, and the packed pairwise distances are gathered into a
//! page-locked host buffer at the end. Swaths of one alignment are
//! serialised on one prioritized stream; alignments for different partners
//! and anchors run concurrently in distinct streams, fanned out round-robin
//! across devices.
//!
//! Buffer lifetime is plain RAII scoped ownership: transients live in the
//! batch scope and drop after that batch's streams synchronize (no
//! stream-completion callbacks).

#![cfg(feature = "cuda")]

use crate::average::{AverageParams, MemberAlignment};
use crate::dtw::backtrace::{backtrace, BacktraceExit};
use crate::dtw::{DtwFlags, StepMatrix};
use crate::pairwise::PairwiseDistances;
use crate::utilities::helpers::ProgressMeter;
use cust::context::{Context, CurrentContext};
use cust::device::Device;
use cust::function::{BlockSize, GridSize};
use cust::memory::{mem_get_info, CopyDestination, DeviceBuffer, LockedBuffer, UnifiedBuffer};
use cust::module::Module;
use cust::prelude::*;
use cust::stream::{Stream, StreamFlags};
use std::ffi::c_void;
use std::fmt;

#[derive(Debug)]
pub enum CudaDtwError {
    Cuda(String),
    InvalidInput(String),
}

impl fmt::Display for CudaDtwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CudaDtwError::Cuda(e) => write!(f, "CUDA error: {}", e),
            CudaDtwError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
        }
    }
}

impl std::error::Error for CudaDtwError {}

fn cuda_err<E: fmt::Display>(e: E) -> CudaDtwError {
    CudaDtwError::Cuda(e.to_string())
}

/// Stream priorities descend from the highest available to the lowest and
/// wrap back, so later (typically longer) alignments yield to finish-up
/// kernels. The driver clamps out-of-range values, so the common [-5, 0]
/// span is walked without querying the exact range.
const PRIORITY_HIGH: i32 = -5;
const PRIORITY_LOW: i32 = 0;

struct PriorityCycle {
    next: i32,
}

impl PriorityCycle {
    fn new() -> Self {
        PriorityCycle {
            next: PRIORITY_HIGH,
        }
    }

    fn next(&mut self) -> i32 {
        let p = self.next;
        self.next = if p >= PRIORITY_LOW {
            PRIORITY_HIGH
        } else {
            p + 1
        };
        p
    }
}

pub struct CudaDtw {
    module: Module,
    _context: Context,
    device_id: u32,
    max_threads: u32,
}

impl CudaDtw {
    pub fn new(device_id: usize) -> Result<Self, CudaDtwError> {
        cust::init(CudaFlags::empty()).map_err(cuda_err)?;
        let device = Device::get_device(device_id as u32).map_err(cuda_err)?;
        let context = Context::new(device).map_err(cuda_err)?;

        let ptx: &str = include_str!(concat!(env!("OUT_DIR"), "/dtw_kernel.ptx"));
        let module = Module::from_ptx(ptx, &[]).map_err(cuda_err)?;
        let max_threads = crate::cuda::max_threads_per_device()
            .get(device_id)
            .copied()
            .unwrap_or(1024);

        Ok(Self {
            module,
            _context: context,
            device_id,
            max_threads,
        })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    fn make_current(&self) -> Result<(), CudaDtwError> {
        CurrentContext::set_current(&self._context).map_err(cuda_err)
    }

    /// One cost-kernel launch over a grid of swaths. All pointers are raw
    /// device addresses; zero stands for "not used" exactly as in the
    /// kernel contract.
    #[allow(clippy::too_many_arguments)]
    fn launch_cost_swath(
        &self,
        stream: &Stream,
        grid_x: u32,
        block_x: u32,
        x: u64,
        x_len: u64,
        y: u64,
        y_len: u64,
        anchor: u64,
        col_offset: u64,
        seqs: u64,
        max_len: u64,
        num_seqs: u64,
        seq_lens: u64,
        prior: u64,
        new_col: u64,
        steps: u64,
        step_pitch: u64,
        step_col_base: u64,
        pair_dists: u64,
        flags: DtwFlags,
        row_limit: u64,
        true_height: u64,
    ) -> Result<(), CudaDtwError> {
        let func = self
            .module
            .get_function("dtw_cost_swath_f32")
            .map_err(cuda_err)?;
        // Circular shared buffer of three diagonals for the wavefront.
        let shared_memory_required = block_x as usize * 3 * std::mem::size_of::<f32>();
        let grid: GridSize = (grid_x.max(1), 1, 1).into();
        let block: BlockSize = (block_x, 1, 1).into();

        unsafe {
            let mut a_x = x;
            let mut a_x_len = x_len;
            let mut a_y = y;
            let mut a_y_len = y_len;
            let mut a_anchor = anchor;
            let mut a_col_offset = col_offset;
            let mut a_seqs = seqs;
            let mut a_max_len = max_len;
            let mut a_num_seqs = num_seqs;
            let mut a_seq_lens = seq_lens;
            let mut a_prior = prior;
            let mut a_new_col = new_col;
            let mut a_steps = steps;
            let mut a_pitch = step_pitch;
            let mut a_col_base = step_col_base;
            let mut a_dists = pair_dists;
            let mut a_open_start = flags.open_start as i32;
            let mut a_open_end = flags.open_end as i32;
            let mut a_row_limit = row_limit;
            let mut a_true_height = true_height;

            let args: &mut [*mut c_void] = &mut [
                &mut a_x as *mut _ as *mut c_void,
                &mut a_x_len as *mut _ as *mut c_void,
                &mut a_y as *mut _ as *mut c_void,
                &mut a_y_len as *mut _ as *mut c_void,
                &mut a_anchor as *mut _ as *mut c_void,
                &mut a_col_offset as *mut _ as *mut c_void,
                &mut a_seqs as *mut _ as *mut c_void,
                &mut a_max_len as *mut _ as *mut c_void,
                &mut a_num_seqs as *mut _ as *mut c_void,
                &mut a_seq_lens as *mut _ as *mut c_void,
                &mut a_prior as *mut _ as *mut c_void,
                &mut a_new_col as *mut _ as *mut c_void,
                &mut a_steps as *mut _ as *mut c_void,
                &mut a_pitch as *mut _ as *mut c_void,
                &mut a_col_base as *mut _ as *mut c_void,
                &mut a_dists as *mut _ as *mut c_void,
                &mut a_open_start as *mut _ as *mut c_void,
                &mut a_open_end as *mut _ as *mut c_void,
                &mut a_row_limit as *mut _ as *mut c_void,
                &mut a_true_height as *mut _ as *mut c_void,
            ];

            stream
                .launch(&func, grid, block, shared_memory_required as u32, args)
                .map_err(cuda_err)?;
        }
        Ok(())
    }

    /// Backtrace one step matrix (or stripe) on the device, atomically
    /// accumulating into the shared centroid sums/counts.
    #[allow(clippy::too_many_arguments)]
    fn launch_update_centroid(
        &self,
        stream: &Stream,
        seq: u64,
        sums: u64,
        counts: u64,
        steps: u64,
        path_cols: u64,
        path_rows: u64,
        step_pitch: u64,
        flip: bool,
        column_offset: u64,
        stripe_rows: u64,
    ) -> Result<(), CudaDtwError> {
        let func = self
            .module
            .get_function("update_centroid_f32")
            .map_err(cuda_err)?;
        let grid: GridSize = (1u32, 1, 1).into();
        let block: BlockSize = (1u32, 1, 1).into();

        unsafe {
            let mut a_seq = seq;
            let mut a_sums = sums;
            let mut a_counts = counts;
            let mut a_steps = steps;
            let mut a_cols = path_cols;
            let mut a_rows = path_rows;
            let mut a_pitch = step_pitch;
            let mut a_flip = flip as i32;
            let mut a_offset = column_offset;
            let mut a_stripe = stripe_rows;

            let args: &mut [*mut c_void] = &mut [
                &mut a_seq as *mut _ as *mut c_void,
                &mut a_sums as *mut _ as *mut c_void,
                &mut a_counts as *mut _ as *mut c_void,
                &mut a_steps as *mut _ as *mut c_void,
                &mut a_cols as *mut _ as *mut c_void,
                &mut a_rows as *mut _ as *mut c_void,
                &mut a_pitch as *mut _ as *mut c_void,
                &mut a_flip as *mut _ as *mut c_void,
                &mut a_offset as *mut _ as *mut c_void,
                &mut a_stripe as *mut _ as *mut c_void,
            ];

            stream.launch(&func, grid, block, 0, args).map_err(cuda_err)?;
        }
        Ok(())
    }
}

fn engines_for_all_devices() -> Result<Vec<CudaDtw>, CudaDtwError> {
    let device_count = crate::cuda::cuda_device_count();
    if device_count == 0 {
        return Err(CudaDtwError::InvalidInput(
            "no CUDA device available".into(),
        ));
    }
    (0..device_count).map(CudaDtw::new).collect()
}

fn block_width_for(engines: &[CudaDtw], requested: usize) -> u32 {
    // Lowest common denominator across devices, capped by the request.
    let cap = engines.iter().map(|e| e.max_threads).min().unwrap_or(1024);
    cap.min(requested.max(1) as u32)
}

struct DeviceSequences {
    seqs: UnifiedBuffer<f32>,
    lens: DeviceBuffer<u64>,
    max_len: usize,
    count: usize,
}

fn upload_sequences(sequences: &[Vec<f64>]) -> Result<DeviceSequences, CudaDtwError> {
    let count = sequences.len();
    let max_len = sequences.iter().map(Vec::len).max().unwrap_or(0);
    let mut flat = vec![0f32; count * max_len];
    for (i, seq) in sequences.iter().enumerate() {
        for (j, &v) in seq.iter().enumerate() {
            flat[i * max_len + j] = v as f32;
        }
    }
    let lens: Vec<u64> = sequences.iter().map(|s| s.len() as u64).collect();
    Ok(DeviceSequences {
        seqs: UnifiedBuffer::from_slice(&flat).map_err(cuda_err)?,
        lens: DeviceBuffer::from_slice(&lens).map_err(cuda_err)?,
        max_len,
        count,
    })
}

/// All-pairs DTW^2 on every available CUDA device, anchors fanned out
/// round-robin, one grid of partner alignments per anchor, swath-pipelined.
pub fn all_pairs_cuda(
    sequences: &[Vec<f64>],
    flags: DtwFlags,
    block_width: usize,
    progress: Option<&ProgressMeter>,
) -> Result<PairwiseDistances, CudaDtwError> {
    let n = sequences.len();
    if n < 2 {
        return Err(CudaDtwError::InvalidInput(format!(
            "all-pairs DTW needs at least two sequences, got {}",
            n
        )));
    }
    let engines = engines_for_all_devices()?;
    let device_count = engines.len();
    let tw = block_width_for(&engines, block_width);
    let num_pairs = n * (n - 1) / 2;

    let mut device_seqs = Vec::with_capacity(device_count);
    let mut device_dists = Vec::with_capacity(device_count);
    for engine in &engines {
        engine.make_current()?;
        device_seqs.push(upload_sequences(sequences)?);
        device_dists.push(
            DeviceBuffer::<f32>::from_slice(&vec![0f32; num_pairs]).map_err(cuda_err)?,
        );
    }
    let max_len = device_seqs[0].max_len;

    let mut priorities = PriorityCycle::new();
    for base in (0..n - 1).step_by(device_count) {
        // One alignment grid per device; buffers stay alive until the batch
        // synchronizes below.
        let mut in_flight: Vec<(usize, Stream, DeviceBuffer<f32>, DeviceBuffer<f32>)> = Vec::new();
        for (d, engine) in engines.iter().enumerate() {
            let anchor = base + d;
            if anchor >= n - 1 {
                break;
            }
            engine.make_current()?;
            let rows = sequences[anchor].len();
            let grid_x = (n - anchor - 1) as u32;
            let cost_elems = rows * grid_x as usize;

            // Sized per anchor: the length sort keeps these minimal. Short
            // free memory only slows things down; calculation continues
            // with whatever allocation succeeds.
            if let Ok((free, total)) = mem_get_info() {
                let needed = 2 * cost_elems * std::mem::size_of::<f32>();
                if free < needed {
                    eprintln!(
                        "Note: Insufficient free GPU memory ({} bytes of total {}) on device {} \
                         for medoid calculation (need {}), calculation speed may suffer.",
                        free, total, engine.device_id, needed
                    );
                    std::thread::sleep(std::time::Duration::from_secs(1));
                }
            }

            let prior =
                unsafe { DeviceBuffer::<f32>::uninitialized(cost_elems) }.map_err(cuda_err)?;
            let new_col =
                unsafe { DeviceBuffer::<f32>::uninitialized(cost_elems) }.map_err(cuda_err)?;
            let stream = Stream::new(StreamFlags::NON_BLOCKING, Some(priorities.next()))
                .map_err(cuda_err)?;

            let state = &device_seqs[d];
            let mut flipped = false;
            let mut offset = 0usize;
            while offset < max_len {
                // Swap the cost-column roles instead of copying between
                // swaths; propagation stays in-order on the stream.
                let (seed, edge) = if flipped {
                    (&new_col, &prior)
                } else {
                    (&prior, &new_col)
                };
                engine.launch_cost_swath(
                    &stream,
                    grid_x,
                    tw,
                    0,
                    0,
                    0,
                    0,
                    anchor as u64,
                    offset as u64,
                    state.seqs.as_ptr() as u64,
                    state.max_len as u64,
                    state.count as u64,
                    state.lens.as_device_ptr().as_raw(),
                    seed.as_device_ptr().as_raw(),
                    edge.as_device_ptr().as_raw(),
                    0,
                    0,
                    0,
                    device_dists[d].as_device_ptr().as_raw(),
                    flags,
                    rows as u64,
                    rows as u64,
                )?;
                flipped = !flipped;
                offset += tw as usize;
            }
            in_flight.push((d, stream, prior, new_col));
        }
        for (d, stream, _, _) in &in_flight {
            engines[*d].make_current()?;
            stream.synchronize().map_err(cuda_err)?;
            if let Some(meter) = progress {
                meter.tick();
            }
        }
    }

    // Gather device-partial rows into one page-locked host buffer.
    let mut host = LockedBuffer::<f32>::new(&0f32, num_pairs).map_err(cuda_err)?;
    for (d, engine) in engines.iter().enumerate() {
        engine.make_current()?;
        for anchor in (d..n - 1).step_by(device_count) {
            let start = anchor * (2 * n - anchor - 1) / 2;
            let count = n - anchor - 1;
            device_dists[d]
                .index(start..start + count)
                .copy_to(&mut host[start..start + count])
                .map_err(cuda_err)?;
        }
    }

    let packed: Vec<f64> = host.iter().map(|&v| v as f64).collect();
    Ok(PairwiseDistances::from_packed(n, packed))
}

/// One DBA refinement round on the CUDA engine. Cost swaths and the
/// centroid-update backtrace run on the devices (sums and counts are
/// unified-memory vectors mutated with system-scope atomics); step matrices
/// are copied back per alignment so the host can emit path files, which
/// also cross-checks the device walk against the host contract.
pub fn dba_update_cuda(
    centroid: &[f64],
    members: &[&[f64]],
    params: &AverageParams,
    progress: Option<&ProgressMeter>,
) -> Result<(Vec<f64>, f64, Vec<MemberAlignment>), CudaDtwError> {
    if members.is_empty() {
        return Err(CudaDtwError::InvalidInput(
            "DBA update has no member sequences".into(),
        ));
    }
    let engines = engines_for_all_devices()?;
    let device_count = engines.len();
    let tw = block_width_for(&engines, params.block_width);
    let center_len = centroid.len();

    engines[0].make_current()?;
    let centroid_f32: Vec<f32> = centroid.iter().map(|&v| v as f32).collect();
    // Unified so every device reads the centroid and mutates the shared
    // accumulator with atomic adds.
    let d_centroid = UnifiedBuffer::from_slice(&centroid_f32).map_err(cuda_err)?;
    let d_sums = UnifiedBuffer::from_slice(&vec![0f32; center_len]).map_err(cuda_err)?;
    let d_counts = UnifiedBuffer::from_slice(&vec![0u32; center_len]).map_err(cuda_err)?;

    let mut priorities = PriorityCycle::new();
    let mut alignments: Vec<MemberAlignment> = Vec::with_capacity(members.len());

    for (member, seq) in members.iter().enumerate() {
        let d = member % device_count;
        let engine = &engines[d];
        engine.make_current()?;

        let flip = params.flags.open_end && seq.len() > center_len;
        let member_f32: Vec<f32> = seq.iter().map(|&v| v as f32).collect();
        let d_member = DeviceBuffer::from_slice(&member_f32).map_err(cuda_err)?;
        let (x_ptr, x_len, y_ptr, y_len) = if flip {
            (
                d_member.as_device_ptr().as_raw(),
                seq.len(),
                d_centroid.as_ptr() as u64,
                center_len,
            )
        } else {
            (
                d_centroid.as_ptr() as u64,
                center_len,
                d_member.as_device_ptr().as_raw(),
                seq.len(),
            )
        };
        let width = x_len;
        let rows = y_len;

        let stream =
            Stream::new(StreamFlags::NON_BLOCKING, Some(priorities.next())).map_err(cuda_err)?;

        let full_pitch = StepMatrix::pitch_for(width);
        let step_bytes = full_pitch * rows;
        let cost_bytes = 2 * rows * std::mem::size_of::<f32>();
        let budget = match params.mem_limit {
            Some(limit) => limit,
            None => mem_get_info().map(|(free, _)| free).map_err(cuda_err)?,
        };
        let striped = budget < cost_bytes + step_bytes + step_bytes / 20;

        let cells = if striped {
            striped_member_pass(
                engine, &stream, tw, x_ptr, width, y_ptr, rows, &d_member, &d_sums, &d_counts,
                flip, params.flags,
            )?
        } else {
            full_member_pass(
                engine, &stream, tw, x_ptr, width, y_ptr, rows, full_pitch, &d_member, &d_sums,
                &d_counts, flip, params.flags,
            )?
        };
        stream.synchronize().map_err(cuda_err)?;
        if let Some(meter) = progress {
            meter.tick();
        }
        alignments.push(MemberAlignment {
            member,
            flip,
            cells,
        });
    }

    for engine in &engines {
        engine.make_current()?;
        CurrentContext::synchronize().map_err(cuda_err)?;
    }

    let refined: Vec<f64> = d_sums
        .iter()
        .zip(d_counts.iter())
        .zip(centroid)
        .map(|((&sum, &count), &prev)| {
            if count == 0 {
                prev
            } else {
                (sum / count as f32) as f64
            }
        })
        .collect();
    let delta = centroid
        .iter()
        .zip(&refined)
        .map(|(old, new)| (old - new).abs())
        .fold(0.0, f64::max);

    Ok((refined, delta, alignments))
}

/// Full-matrix pass: one pitched step matrix for the whole alignment,
/// device-side accumulate, then a host copy for path emission.
#[allow(clippy::too_many_arguments)]
fn full_member_pass(
    engine: &CudaDtw,
    stream: &Stream,
    tw: u32,
    x_ptr: u64,
    width: usize,
    y_ptr: u64,
    rows: usize,
    pitch: usize,
    d_member: &DeviceBuffer<f32>,
    d_sums: &UnifiedBuffer<f32>,
    d_counts: &UnifiedBuffer<u32>,
    flip: bool,
    flags: DtwFlags,
) -> Result<Vec<crate::dtw::PathCell>, CudaDtwError> {
    let d_steps =
        unsafe { DeviceBuffer::<u8>::uninitialized(pitch * rows) }.map_err(cuda_err)?;
    let prior = unsafe { DeviceBuffer::<f32>::uninitialized(rows) }.map_err(cuda_err)?;
    let new_col = unsafe { DeviceBuffer::<f32>::uninitialized(rows) }.map_err(cuda_err)?;

    let mut flipped = false;
    let mut offset = 0usize;
    while offset < width {
        let (seed, edge) = if flipped {
            (&new_col, &prior)
        } else {
            (&prior, &new_col)
        };
        engine.launch_cost_swath(
            stream,
            1,
            tw,
            x_ptr,
            width as u64,
            y_ptr,
            rows as u64,
            0,
            offset as u64,
            0,
            0,
            0,
            0,
            seed.as_device_ptr().as_raw(),
            edge.as_device_ptr().as_raw(),
            d_steps.as_device_ptr().as_raw(),
            pitch as u64,
            0,
            0,
            flags,
            rows as u64,
            rows as u64,
        )?;
        flipped = !flipped;
        offset += tw as usize;
    }

    engine.launch_update_centroid(
        stream,
        d_member.as_device_ptr().as_raw(),
        d_sums.as_ptr() as u64,
        d_counts.as_ptr() as u64,
        d_steps.as_device_ptr().as_raw(),
        width as u64,
        rows as u64,
        pitch as u64,
        flip,
        0,
        0,
    )?;
    stream.synchronize().map_err(cuda_err)?;

    let mut host_steps = vec![0u8; pitch * rows];
    d_steps.copy_to(&mut host_steps).map_err(cuda_err)?;
    let matrix = StepMatrix::from_raw(host_steps, pitch, width, rows);
    let mut cells = Vec::new();
    backtrace(&matrix, width - 1, rows - 1, 0, &mut cells);
    Ok(cells)
}

/// Striped pass: leading-edge cost slots forward, then right-to-left
/// stripe recomputes bounded to the live rows, each stripe accumulated on
/// the device and walked on the host for the path file.
#[allow(clippy::too_many_arguments)]
fn striped_member_pass(
    engine: &CudaDtw,
    stream: &Stream,
    tw: u32,
    x_ptr: u64,
    width: usize,
    y_ptr: u64,
    rows: usize,
    d_member: &DeviceBuffer<f32>,
    d_sums: &UnifiedBuffer<f32>,
    d_counts: &UnifiedBuffer<u32>,
    flip: bool,
    flags: DtwFlags,
) -> Result<Vec<crate::dtw::PathCell>, CudaDtwError> {
    let tw_usize = tw as usize;
    let n_swaths = width.div_ceil(tw_usize);
    let f32_size = std::mem::size_of::<f32>() as u64;

    // Forward pass: every swath's leading edge lands in its own slot of one
    // indexed arena (no pointer links between slots). Falls back to managed
    // memory if the device-local arena will not fit.
    let slot_elems = n_swaths * rows;
    enum CostArena {
        Device(DeviceBuffer<f32>),
        Managed(UnifiedBuffer<f32>),
    }
    let arena = match unsafe { DeviceBuffer::<f32>::uninitialized(slot_elems) } {
        Ok(buf) => CostArena::Device(buf),
        Err(_) => {
            CostArena::Managed(UnifiedBuffer::from_slice(&vec![0f32; slot_elems]).map_err(cuda_err)?)
        }
    };
    let arena_ptr = match &arena {
        CostArena::Device(buf) => buf.as_device_ptr().as_raw(),
        CostArena::Managed(buf) => buf.as_ptr() as u64,
    };

    for s in 0..n_swaths {
        let seed = if s == 0 {
            arena_ptr // ignored by the kernel for the leftmost swath
        } else {
            arena_ptr + ((s - 1) * rows) as u64 * f32_size
        };
        let edge = arena_ptr + (s * rows) as u64 * f32_size;
        engine.launch_cost_swath(
            stream,
            1,
            tw,
            x_ptr,
            width as u64,
            y_ptr,
            rows as u64,
            0,
            (s * tw_usize) as u64,
            0,
            0,
            0,
            0,
            seed,
            edge,
            0,
            0,
            0,
            0,
            flags,
            rows as u64,
            rows as u64,
        )?;
    }

    // Backward pass: a single stripe-wide pitched step matrix, reused for
    // every stripe; pitched managed memory with a stream attach if even
    // that allocation fails.
    let stripe_cols = tw_usize.min(width);
    let stripe_pitch = StepMatrix::pitch_for(stripe_cols);
    enum StripeSteps {
        Device(DeviceBuffer<u8>),
        Managed(UnifiedBuffer<u8>),
    }
    let stripe_steps = match unsafe { DeviceBuffer::<u8>::uninitialized(stripe_pitch * rows) } {
        Ok(buf) => StripeSteps::Device(buf),
        Err(_) => {
            let buf =
                UnifiedBuffer::from_slice(&vec![0u8; stripe_pitch * rows]).map_err(cuda_err)?;
            StripeSteps::Managed(buf)
        }
    };
    let stripe_ptr = match &stripe_steps {
        StripeSteps::Device(buf) => buf.as_device_ptr().as_raw(),
        StripeSteps::Managed(buf) => buf.as_ptr() as u64,
    };
    let d_stripe_rows = DeviceBuffer::from_slice(&[rows as i32]).map_err(cuda_err)?;

    let mut live_rows = rows;
    let mut host_steps = vec![0u8; stripe_pitch * rows];
    let mut cells = Vec::new();
    for s in (0..n_swaths).rev() {
        let left_col = s * tw_usize;
        let span = tw_usize.min(width - left_col);
        let seed = if s == 0 {
            arena_ptr
        } else {
            arena_ptr + ((s - 1) * rows) as u64 * f32_size
        };
        engine.launch_cost_swath(
            stream,
            1,
            tw,
            x_ptr,
            width as u64,
            y_ptr,
            rows as u64,
            0,
            left_col as u64,
            0,
            0,
            0,
            0,
            seed,
            0,
            stripe_ptr,
            stripe_pitch as u64,
            left_col as u64,
            0,
            flags,
            live_rows as u64,
            rows as u64,
        )?;
        engine.launch_update_centroid(
            stream,
            d_member.as_device_ptr().as_raw(),
            d_sums.as_ptr() as u64,
            d_counts.as_ptr() as u64,
            stripe_ptr,
            span as u64,
            live_rows as u64,
            stripe_pitch as u64,
            flip,
            left_col as u64,
            d_stripe_rows.as_device_ptr().as_raw(),
        )?;
        stream.synchronize().map_err(cuda_err)?;

        match &stripe_steps {
            StripeSteps::Device(buf) => buf.copy_to(&mut host_steps).map_err(cuda_err)?,
            StripeSteps::Managed(buf) => host_steps.copy_from_slice(buf),
        }
        let matrix =
            StepMatrix::from_raw(host_steps.clone(), stripe_pitch, stripe_cols, rows);
        match backtrace(&matrix, span - 1, live_rows - 1, left_col, &mut cells) {
            BacktraceExit::Anchored => return Ok(cells),
            BacktraceExit::LeftEdge { next_rows } => live_rows = next_rows,
        }
    }
    Err(CudaDtwError::Cuda(
        "striped DTW backtrace never reached an anchor".into(),
    ))
}
