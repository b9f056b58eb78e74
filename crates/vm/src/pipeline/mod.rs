//! Particle emitters: reset, init, update and spawn routines sharing a set of UAVs.

pub mod kernels;

use crate::{Bundle, EmitterError, Runtime, Timeline, TimelineState, UavKey, UavResource, groups_for};
use fxvm_core::{CompileError, FxType, Native, Program, TypeLayout};
use std::sync::Arc;
use tracing::{debug, info};

/// Free slot stack, `counter` is the number of free slots.
pub const DEAD_INDICES: &str = "uavDeadIndices";
/// Per slot creation flags consumed by the init routine.
pub const CREATION_REQUESTS: &str = "uavCreationRequests";
pub const PARTICLES: &str = "uavParticles";
/// Per slot alive flags.
pub const STATES: &str = "uavStates";
/// Largest capacity an emitter accepts.
pub const MAX_CAPACITY: u32 = i32::MAX as u32;

/// Uniform every routine may declare to learn the emitter capacity.
pub const CAPACITY: &str = "capacity";

/// Everything needed to build an [`Emitter`].
#[derive(Clone, Debug)]
pub struct EmitterDesc {
    pub name: String,
    /// Number of particle slots. One slot is reserved, so at most `capacity - 1` particles live at once.
    ///
    /// Must lie in `1..=MAX_CAPACITY`; the free counter is a signed word.
    pub capacity: u32,
    pub particle: TypeLayout,
    pub reset: Arc<Program>,
    pub init: Arc<Program>,
    pub update: Arc<Program>,
    /// Returns the number of particles to emit per tick.
    pub spawn: Option<Arc<Program>>,
}

impl EmitterDesc {
    pub fn new(
        name: impl Into<String>,
        capacity: u32,
        particle: TypeLayout,
        reset: Arc<Program>,
        init: Arc<Program>,
        update: Arc<Program>,
    ) -> Self {
        Self {
            name: name.into(),
            capacity,
            particle,
            reset,
            init,
            update,
            spawn: None,
        }
    }

    pub fn with_spawn(mut self, spawn: Arc<Program>) -> Self {
        self.spawn = Some(spawn);
        self
    }

    /// An emitter running the [`kernels`] routines.
    pub fn reference(name: impl Into<String>, capacity: u32, particle: TypeLayout) -> Result<Self, CompileError> {
        let reset = kernels::reset()?;
        let init = kernels::init(&particle, 1.0, 1.0)?;
        let update = kernels::update(&particle)?;
        Ok(Self::new(
            name,
            capacity,
            particle,
            Arc::new(reset),
            Arc::new(init),
            Arc::new(update),
        ))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmitterState {
    Uninitialized,
    Ready,
    Running,
    Stopped,
}

/// Outcome of [`Emitter::emit`]. Fewer particles than requested are created when the
/// emitter runs out of free slots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub requested: u32,
    pub created: u32,
}

impl EmitReport {
    pub fn is_exhausted(&self) -> bool {
        self.created < self.requested
    }
}

struct Routines {
    reset: Bundle,
    init: Bundle,
    update: Bundle,
    spawn: Option<Bundle>,

    dead: UavKey,
    requests: UavKey,
    particles: UavKey,
    states: UavKey,
}

/// A particle system built from compiled routines.
///
/// The emitter owns its runtime, so the UAVs it creates are only shared between its own
/// routines. It owns no clock either; time comes from a [`Timeline`] passed to [`Emitter::tick`].
pub struct Emitter {
    desc: EmitterDesc,
    state: EmitterState,
    runtime: Runtime,
    routines: Option<Routines>,
}

impl Emitter {
    pub fn new(desc: EmitterDesc) -> Self {
        Self {
            desc,
            state: EmitterState::Uninitialized,
            runtime: Runtime::new(),
            routines: None,
        }
    }

    /// Create the emitter and run [`Emitter::setup`].
    pub fn build(desc: EmitterDesc) -> Result<Self, EmitterError> {
        let mut emitter = Self::new(desc);
        emitter.setup()?;
        Ok(emitter)
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn desc(&self) -> &EmitterDesc {
        &self.desc
    }

    pub fn state(&self) -> EmitterState {
        self.state
    }

    pub fn capacity(&self) -> u32 {
        self.desc.capacity
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Create the shared UAVs and one bundle per routine.
    ///
    /// Every UAV a routine declares is created with `capacity` elements, or reused when an
    /// earlier routine declared one with the same name. Each routine sees the UAVs at its own
    /// reflected registers. Setting up again discards all particle state.
    pub fn setup(&mut self) -> Result<(), EmitterError> {
        let desc = &self.desc;
        if desc.capacity == 0 {
            return Err(EmitterError::ZeroCapacity {
                name: desc.name.clone(),
            });
        }
        if desc.capacity > MAX_CAPACITY {
            return Err(EmitterError::CapacityTooLarge {
                name: desc.name.clone(),
                capacity: desc.capacity,
            });
        }

        let mut runtime = Runtime::new();
        let mut load = |program: &Arc<Program>| -> Result<Bundle, EmitterError> {
            let mut bundle = runtime.load(program.clone());
            for uav in program.reflection().uavs.iter() {
                let key = runtime.create_uav(&uav.name, uav.stride, desc.capacity, uav.register)?;
                bundle.bind_uav(uav.register, key)?;
            }

            bundle.set_uniforms([(CAPACITY, Native::Uint(desc.capacity))])?;
            Ok(bundle)
        };

        let reset = load(&desc.reset)?;
        let init = load(&desc.init)?;
        let update = load(&desc.update)?;
        let spawn = desc.spawn.as_ref().map(&mut load).transpose()?;

        let find = |uav: &'static str| {
            runtime.find_uav(uav).ok_or_else(|| EmitterError::MissingUav {
                name: desc.name.clone(),
                uav,
            })
        };

        let routines = Routines {
            reset,
            init,
            update,
            spawn,
            dead: find(DEAD_INDICES)?,
            requests: find(CREATION_REQUESTS)?,
            particles: find(PARTICLES)?,
            states: find(STATES)?,
        };

        let stride = runtime.uav(routines.particles).map_or(0, |uav| uav.element_size());
        if stride != desc.particle.size {
            return Err(EmitterError::ParticleStride {
                name: desc.name.clone(),
                expected: desc.particle.size,
                found: stride,
            });
        }

        debug!(
            name = %desc.name,
            capacity = desc.capacity,
            particle = %desc.particle.name,
            uavs = runtime.uavs().len(),
            spawn = routines.spawn.is_some(),
            "emitter set up"
        );

        self.runtime = runtime;
        self.routines = Some(routines);
        self.transition(EmitterState::Ready);
        Ok(())
    }

    /// Mark every slot free: dispatch the reset routine, then set the dead index counter to
    /// `capacity - 1`.
    pub fn reset(&mut self) -> Result<(), EmitterError> {
        let capacity = self.desc.capacity;
        let routines = self.routines.as_mut().ok_or_else(|| not_ready(&self.desc, self.state))?;

        let threads = routines.reset.program().numthreads();
        self.runtime
            .dispatch(&mut routines.reset, groups_for(capacity, threads), threads)?;

        let dead = routines.dead;
        self.uav_mut(dead, DEAD_INDICES)?
            .overwrite_counter(capacity as i32 - 1);
        Ok(())
    }

    /// Request `count` new particles.
    ///
    /// The request is clamped to the number of free slots; the init routine then pops one
    /// free slot per request itself.
    pub fn emit(&mut self, count: u32) -> Result<EmitReport, EmitterError> {
        let capacity = self.desc.capacity;
        let routines = self.routines.as_ref().ok_or_else(|| not_ready(&self.desc, self.state))?;
        let (dead, requests) = (routines.dead, routines.requests);

        let free = self.uav(dead, DEAD_INDICES)?.read_counter().max(0) as u32;
        let clamped = count.min(free).min(capacity);
        if clamped > 0 {
            let requests = self.uav_mut(requests, CREATION_REQUESTS)?;
            for slot in 0..clamped.min(requests.len()) {
                requests.write_element(slot, &1u32);
            }

            let routines = self.routines.as_mut().ok_or_else(|| not_ready(&self.desc, self.state))?;
            let threads = routines.init.program().numthreads();
            self.runtime
                .dispatch(&mut routines.init, groups_for(clamped, threads), threads)?;
        }

        let left = self.uav(dead, DEAD_INDICES)?.read_counter().max(0) as u32;
        let report = EmitReport {
            requested: count,
            created: free.saturating_sub(left),
        };

        if report.is_exhausted() {
            debug!(name = %self.desc.name, requested = count, created = report.created, "emitter is full");
        }

        Ok(report)
    }

    /// Push `uniforms` into the update routine and dispatch it over every slot.
    pub fn update<'a>(&mut self, uniforms: impl IntoIterator<Item = (&'a str, Native)>) -> Result<(), EmitterError> {
        let capacity = self.desc.capacity;
        let routines = self.routines.as_mut().ok_or_else(|| not_ready(&self.desc, self.state))?;

        routines.update.set_uniforms(uniforms)?;
        let threads = routines.update.program().numthreads();
        self.runtime
            .dispatch(&mut routines.update, groups_for(capacity, threads), threads)?;
        Ok(())
    }

    /// Follow `timeline`: start or stop with it, and while it runs update the particles and
    /// emit whatever the spawn routine asks for.
    pub fn tick(&mut self, timeline: &Timeline) -> Result<Option<EmitReport>, EmitterError> {
        match (self.state, timeline.state()) {
            (EmitterState::Uninitialized, _) => return Err(not_ready(&self.desc, self.state)),
            (EmitterState::Ready | EmitterState::Stopped, TimelineState::Running) => self.start()?,
            (EmitterState::Running, TimelineState::Stopped) => self.stop()?,
            _ => {}
        }

        if self.state != EmitterState::Running || !timeline.is_running() {
            return Ok(None);
        }

        self.update(timeline.uniforms())?;

        let routines = self.routines.as_mut().ok_or_else(|| not_ready(&self.desc, self.state))?;
        let Some(spawn) = routines.spawn.as_mut() else {
            return Ok(None);
        };

        spawn.set_uniforms(timeline.uniforms())?;
        let count = self.runtime.play(spawn)?;
        if count > 0 {
            self.emit(count as u32).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn start(&mut self) -> Result<(), EmitterError> {
        match self.state {
            EmitterState::Uninitialized => Err(not_ready(&self.desc, self.state)),
            _ => {
                self.transition(EmitterState::Running);
                Ok(())
            }
        }
    }

    pub fn stop(&mut self) -> Result<(), EmitterError> {
        match self.state {
            EmitterState::Uninitialized => Err(not_ready(&self.desc, self.state)),
            EmitterState::Ready => Ok(()),
            _ => {
                self.transition(EmitterState::Stopped);
                Ok(())
            }
        }
    }

    /// `capacity - 1 - free slots`, or 0 before setup.
    pub fn num_alive(&self) -> u32 {
        let Some(counter) = self.dead_indices().map(|uav| uav.read_counter()) else {
            return 0;
        };

        (self.desc.capacity as i64 - 1 - counter as i64).max(0) as u32
    }

    pub fn dead_indices(&self) -> Option<&UavResource> {
        self.routines.as_ref().and_then(|r| self.runtime.uav(r.dead))
    }

    pub fn creation_requests(&self) -> Option<&UavResource> {
        self.routines.as_ref().and_then(|r| self.runtime.uav(r.requests))
    }

    pub fn particles(&self) -> Option<&UavResource> {
        self.routines.as_ref().and_then(|r| self.runtime.uav(r.particles))
    }

    pub fn states(&self) -> Option<&UavResource> {
        self.routines.as_ref().and_then(|r| self.runtime.uav(r.states))
    }

    /// Slots whose alive flag is set, in slot order.
    pub fn alive_slots(&self) -> Result<Vec<u32>, EmitterError> {
        let routines = self.routines.as_ref().ok_or_else(|| not_ready(&self.desc, self.state))?;
        let states = self.uav(routines.states, STATES)?;
        Ok((0..states.len())
            .filter(|&slot| states.read_element::<u32>(slot).is_some_and(|alive| alive != 0))
            .collect())
    }

    /// Decode every alive particle with the emitter's particle layout.
    pub fn alive_particles(&self) -> Result<Vec<(u32, Native)>, EmitterError> {
        let routines = self.routines.as_ref().ok_or_else(|| not_ready(&self.desc, self.state))?;
        let particles = self.uav(routines.particles, PARTICLES)?;

        let mut alive = Vec::new();
        for slot in self.alive_slots()? {
            if let Some(particle) = particles.decode_element(slot, &self.desc.particle) {
                alive.push((slot, particle?));
            }
        }

        Ok(alive)
    }

    /// Read every alive particle as a host type laid out like the particle.
    pub fn alive_particles_as<T: FxType>(&self) -> Result<Vec<(u32, T)>, EmitterError> {
        let routines = self.routines.as_ref().ok_or_else(|| not_ready(&self.desc, self.state))?;
        let particles = self.uav(routines.particles, PARTICLES)?;

        let size = T::layout().size;
        if size != particles.element_size() {
            return Err(EmitterError::ParticleStride {
                name: self.desc.name.clone(),
                expected: particles.element_size(),
                found: size,
            });
        }

        Ok(self
            .alive_slots()?
            .into_iter()
            .filter_map(|slot| particles.read_element::<T>(slot).map(|p| (slot, p)))
            .collect())
    }

    /// Log counters and alive particles at debug level.
    pub fn dump(&self) {
        for (_, uav) in self.runtime.uavs().iter() {
            debug!(
                emitter = %self.desc.name,
                uav = uav.name(),
                counter = uav.read_counter(),
                length = uav.len(),
                "uav"
            );
        }

        debug!(emitter = %self.desc.name, state = ?self.state, alive = self.num_alive(), "emitter");
        match self.alive_particles() {
            Ok(particles) => {
                for (slot, particle) in particles {
                    debug!(emitter = %self.desc.name, slot, ?particle, "particle");
                }
            }
            Err(err) => debug!(emitter = %self.desc.name, %err, "no particles"),
        }
    }

    /// Copy the particle state of `other` into this emitter, for example after rebuilding
    /// it from recompiled routines. Both must be set up with the same capacity and layout.
    pub fn copy_state_from(&mut self, other: &Emitter) -> Result<(), EmitterError> {
        let incompatible = || EmitterError::IncompatibleState {
            name: self.desc.name.clone(),
            other: other.desc.name.clone(),
        };

        if self.desc.capacity != other.desc.capacity || self.desc.particle != other.desc.particle {
            return Err(incompatible());
        }

        let ours = self.routines.as_ref().ok_or_else(|| not_ready(&self.desc, self.state))?;
        let theirs = other.routines.as_ref().ok_or_else(|| not_ready(&other.desc, other.state))?;

        let pairs = [
            (ours.dead, theirs.dead, DEAD_INDICES),
            (ours.requests, theirs.requests, CREATION_REQUESTS),
            (ours.particles, theirs.particles, PARTICLES),
            (ours.states, theirs.states, STATES),
        ];

        for (target, source, name) in pairs {
            if self.uav(target, name)?.buffer().len() != other.uav(source, name)?.buffer().len() {
                return Err(incompatible());
            }
        }

        for (target, source, name) in pairs {
            let bytes = other.uav(source, name)?.buffer().to_vec();
            self.uav_mut(target, name)?.buffer_mut().copy_from_slice(&bytes);
        }

        debug!(name = %self.desc.name, from = %other.desc.name, "copied emitter state");
        Ok(())
    }

    fn transition(&mut self, state: EmitterState) {
        if self.state != state {
            info!(name = %self.desc.name, from = ?self.state, to = ?state, "emitter state");
            self.state = state;
        }
    }

    fn uav(&self, key: UavKey, uav: &'static str) -> Result<&UavResource, EmitterError> {
        self.runtime.uav(key).ok_or_else(|| EmitterError::MissingUav {
            name: self.desc.name.clone(),
            uav,
        })
    }

    fn uav_mut(&mut self, key: UavKey, uav: &'static str) -> Result<&mut UavResource, EmitterError> {
        let name = &self.desc.name;
        self.runtime.uav_mut(key).ok_or_else(|| EmitterError::MissingUav {
            name: name.clone(),
            uav,
        })
    }
}

fn not_ready(desc: &EmitterDesc, state: EmitterState) -> EmitterError {
    EmitterError::NotReady {
        name: desc.name.clone(),
        state,
    }
}
