//! Reference particle routines, assembled with [`ProgramBuilder`].
//!
//! They implement the dead index free list shared by every emitter:
//! `uavDeadIndices` holds free particle slots at `1..=counter`, slot 0 is never handed out.
//! Particles are expected to have `age` and `lifetime` float fields; `position` and
//! `velocity` (`float3`) and `id` (`int`/`uint`) are used when present.

use super::{CAPACITY, CREATION_REQUESTS, DEAD_INDICES, PARTICLES, STATES};
use crate::timeline::ELAPSED_TIME;
use fxvm_core::{
    CBUFFER0_REGISTER, CompileError, Label, Native, Program, ProgramBuilder, Reg, ScalarType, SystemValue, TypeKind, TypeLayout, VMOp,
};

/// Thread group size of the per particle routines.
pub const GROUP_SIZE: u32 = 64;

/// A particle layout every reference routine understands.
pub fn particle() -> TypeLayout {
    let float = TypeLayout::scalar(ScalarType::Float);
    let float3 = TypeLayout::vector(ScalarType::Float, 3);
    TypeLayout::structure(
        "Particle",
        [
            ("position", float3.clone()),
            ("velocity", float3),
            ("age", float.clone()),
            ("lifetime", float),
            ("id", TypeLayout::scalar(ScalarType::Uint)),
        ],
    )
}

/// `dead[tid] = tid`, clears `states` and `creationRequests`.
///
/// The host sets the dead index counter to `capacity - 1` afterwards.
pub fn reset() -> Result<Program, CompileError> {
    let mut builder = ProgramBuilder::new(TypeLayout::void());
    builder.numthreads(GROUP_SIZE);
    let dead = builder.uav(DEAD_INDICES, 0, TypeLayout::scalar(ScalarType::Int));
    let requests = builder.uav(CREATION_REQUESTS, 1, TypeLayout::scalar(ScalarType::Uint));
    let states = builder.uav(STATES, 2, TypeLayout::scalar(ScalarType::Uint));

    let (tid, end) = thread_guard(&mut builder)?;
    let zero = builder.lit_i(0);
    builder
        .push(VMOp::StoreInputPtr(dead, tid, 1, tid))
        .push(VMOp::StoreInputPtr(requests, tid, 1, zero))
        .push(VMOp::StoreInputPtr(states, tid, 1, zero));

    builder.bind(end);
    builder.finish()
}

/// Consume a creation request: pop a free slot, mark it alive and initialise the particle.
///
/// `lifetime` and `speed` become constants of the program.
pub fn init(particle: &TypeLayout, lifetime: f32, speed: f32) -> Result<Program, CompileError> {
    let layout = ParticleFields::of(particle)?;

    let mut builder = ProgramBuilder::new(TypeLayout::void());
    builder.numthreads(GROUP_SIZE);
    let particles = builder.uav(PARTICLES, 0, particle.clone());
    let dead = builder.uav(DEAD_INDICES, 1, TypeLayout::scalar(ScalarType::Int));
    let requests = builder.uav(CREATION_REQUESTS, 2, TypeLayout::scalar(ScalarType::Uint));
    let states = builder.uav(STATES, 3, TypeLayout::scalar(ScalarType::Uint));

    let float = TypeLayout::scalar(ScalarType::Float);
    let lifetime = builder.constant("lifetime", float.clone(), &Native::Float(lifetime))?;
    let speed = builder.constant("speed", float, &Native::Float(speed))?;

    let (tid, end) = thread_guard(&mut builder)?;
    let zero = builder.lit_i(0);
    let one = builder.lit_i(1);

    let requested = builder.reg();
    builder.push(VMOp::LoadInputPtr(requests, tid, 1, requested));
    builder.jump_unless(requested, end);
    builder.push(VMOp::StoreInputPtr(requests, tid, 1, zero));

    // pop
    let n = builder.load(dead, 0);
    let any = builder.reg();
    builder.push(VMOp::LtI(zero, n, any));
    builder.jump_unless(any, end);
    let rest = builder.reg();
    let id = builder.reg();
    builder
        .push(VMOp::SubI(n, one, rest))
        .push(VMOp::StoreInput(dead, 0, rest))
        .push(VMOp::LoadInputPtr(dead, n, 1, id))
        .push(VMOp::StoreInputPtr(states, id, 1, one));

    let base = layout.element(&mut builder, id);
    for word in 0..layout.words {
        builder.push(VMOp::StoreInputPtr(particles, base, word, zero));
    }

    let lifetime = builder.load(CBUFFER0_REGISTER, lifetime);
    builder.push(VMOp::StoreInputPtr(particles, base, layout.lifetime, lifetime));
    if let Some(velocity) = layout.velocity {
        let speed = builder.load(CBUFFER0_REGISTER, speed);
        builder.push(VMOp::StoreInputPtr(particles, base, velocity + 1, speed));
    }
    if let Some(field) = layout.id {
        builder.push(VMOp::StoreInputPtr(particles, base, field, id));
    }

    builder.bind(end);
    builder.finish()
}

/// Age alive particles by `elapsedTime`, integrate their position and push expired
/// slots back onto the dead index stack.
pub fn update(particle: &TypeLayout) -> Result<Program, CompileError> {
    let layout = ParticleFields::of(particle)?;

    let mut builder = ProgramBuilder::new(TypeLayout::void());
    builder.numthreads(GROUP_SIZE);
    let particles = builder.uav(PARTICLES, 0, particle.clone());
    let dead = builder.uav(DEAD_INDICES, 1, TypeLayout::scalar(ScalarType::Int));
    let states = builder.uav(STATES, 2, TypeLayout::scalar(ScalarType::Uint));

    let dt = builder.uniform(ELAPSED_TIME, TypeLayout::scalar(ScalarType::Float))?;
    let (tid, end) = thread_guard(&mut builder)?;
    let zero = builder.lit_i(0);
    let one = builder.lit_i(1);

    let alive = builder.reg();
    builder.push(VMOp::LoadInputPtr(states, tid, 1, alive));
    builder.jump_unless(alive, end);

    let base = layout.element(&mut builder, tid);
    let age = builder.reg();
    builder
        .push(VMOp::LoadInputPtr(particles, base, layout.age, age))
        .push(VMOp::AddF(age, dt, age))
        .push(VMOp::StoreInputPtr(particles, base, layout.age, age));

    if let (Some(position), Some(velocity)) = (layout.position, layout.velocity) {
        let (p, v) = (builder.reg(), builder.reg());
        for c in 0..3 {
            builder
                .push(VMOp::LoadInputPtr(particles, base, position + c, p))
                .push(VMOp::LoadInputPtr(particles, base, velocity + c, v))
                .push(VMOp::MulF(v, dt, v))
                .push(VMOp::AddF(p, v, p))
                .push(VMOp::StoreInputPtr(particles, base, position + c, p));
        }
    }

    let lifetime = builder.reg();
    let expired = builder.reg();
    builder
        .push(VMOp::LoadInputPtr(particles, base, layout.lifetime, lifetime))
        .push(VMOp::GeF(age, lifetime, expired));
    builder.jump_unless(expired, end);

    // push
    let n = builder.load(dead, 0);
    builder
        .push(VMOp::StoreInputPtr(states, tid, 1, zero))
        .push(VMOp::AddI(n, one, n))
        .push(VMOp::StoreInput(dead, 0, n))
        .push(VMOp::StoreInputPtr(dead, n, 1, tid));

    builder.bind(end);
    builder.finish()
}

/// Return the `spawnCount` constant: the number of particles to emit per tick.
pub fn spawn(count: i32) -> Result<Program, CompileError> {
    let mut builder = ProgramBuilder::new(TypeLayout::scalar(ScalarType::Int));
    let offset = builder.constant("spawnCount", TypeLayout::scalar(ScalarType::Int), &Native::Int(count))?;
    let result = builder.result();
    builder.push(VMOp::LoadInput(CBUFFER0_REGISTER, offset, result));
    builder.finish()
}

/// Load `DispatchThreadID.x` and skip the routine when it is outside the capacity.
fn thread_guard(builder: &mut ProgramBuilder) -> Result<(Reg, Label), CompileError> {
    let tid = builder.system_value(SystemValue::DispatchThreadId, 0);
    let capacity = builder.uniform(CAPACITY, TypeLayout::scalar(ScalarType::Uint))?;
    let inside = builder.reg();
    builder.push(VMOp::LtU(tid, capacity, inside));

    let end = builder.label();
    builder.jump_unless(inside, end);
    Ok((tid, end))
}

/// Word offsets of the fields the routines touch.
struct ParticleFields {
    words: u32,
    age: u32,
    lifetime: u32,
    position: Option<u32>,
    velocity: Option<u32>,
    id: Option<u32>,
}

impl ParticleFields {
    fn of(particle: &TypeLayout) -> Result<Self, CompileError> {
        let float = TypeLayout::scalar(ScalarType::Float);
        let float3 = TypeLayout::vector(ScalarType::Float, 3);

        let required = |name: &str| -> Result<u32, CompileError> {
            let field = particle
                .field(name)
                .ok_or_else(|| CompileError::UnknownIdentifier(format!("{}.{name}", particle.name)))?;
            if field.ty != float {
                return Err(CompileError::Type(format!(
                    "`{}.{name}` must be a float, found {}",
                    particle.name, field.ty.name
                )));
            }
            Ok(field.offset / 4)
        };

        let optional = |name: &str, accept: &dyn Fn(&TypeLayout) -> bool| {
            particle
                .field(name)
                .filter(|f| accept(&f.ty))
                .map(|f| f.offset / 4)
        };

        Ok(Self {
            words: particle.words(),
            age: required("age")?,
            lifetime: required("lifetime")?,
            position: optional("position", &|ty| *ty == float3),
            velocity: optional("velocity", &|ty| *ty == float3),
            id: optional("id", &|ty| matches!(ty.kind, TypeKind::Scalar(ScalarType::Int | ScalarType::Uint))),
        })
    }

    /// First word of particle `index` inside the particle buffer, past the counter.
    fn element(&self, builder: &mut ProgramBuilder, index: Reg) -> Reg {
        let one = builder.lit_i(1);
        let stride = builder.lit_i(self.words as i32);
        let base = builder.reg();
        builder.push(VMOp::MadI(one, index, stride, base));
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routines_declare_the_shared_uavs() {
        let particle = particle();
        let init = init(&particle, 1.0, 1.0).unwrap();
        assert_eq!(init.uav(PARTICLES).map(|u| u.stride), Some(particle.size));
        assert_eq!(init.uav(DEAD_INDICES).map(|u| u.register), Some(1));
        assert_eq!(init.numthreads().x, GROUP_SIZE);

        let reset = reset().unwrap();
        assert!(reset.uav(PARTICLES).is_none());
        assert!(reset.constant(CAPACITY).is_some());

        let update = update(&particle).unwrap();
        assert!(update.constant(ELAPSED_TIME).is_some());
        assert!(update.uav(CREATION_REQUESTS).is_none());
    }

    #[test]
    fn particles_need_age_and_lifetime() {
        let float = TypeLayout::scalar(ScalarType::Float);
        let no_age = TypeLayout::structure("Spark", [("lifetime", float.clone())]);
        assert_eq!(
            update(&no_age).map(|_| ()),
            Err(CompileError::UnknownIdentifier("Spark.age".into()))
        );

        let int_age = TypeLayout::structure(
            "Spark",
            [("age", TypeLayout::scalar(ScalarType::Int)), ("lifetime", float)],
        );
        assert!(matches!(init(&int_age, 1.0, 0.0), Err(CompileError::Type(_))));
    }

    #[test]
    fn minimal_particles() {
        let float = TypeLayout::scalar(ScalarType::Float);
        let spark = TypeLayout::structure("Spark", [("age", float.clone()), ("lifetime", float)]);
        let fields = ParticleFields::of(&spark).unwrap();
        assert_eq!((fields.words, fields.age, fields.lifetime), (2, 0, 1));
        assert_eq!((fields.position, fields.velocity, fields.id), (None, None, None));
    }

    #[test]
    fn spawn_returns_its_constant() {
        let spawn = spawn(5).unwrap();
        assert_eq!(spawn.constant("spawnCount").map(|c| c.offset), Some(0));
        assert_eq!(spawn.constants(), &5i32.to_le_bytes());
    }
}
