use fxvm::{
    Emitter, EmitterDesc, EmitterError, EmitterState, FxType, Native, Timeline, pipeline::kernels,
};
use proptest::prelude::*;
use std::{sync::Arc, time::Duration};

#[derive(FxType, Debug, Clone, Copy, PartialEq)]
struct Particle {
    position: [f32; 3],
    velocity: [f32; 3],
    age: f32,
    lifetime: f32,
    id: u32,
}

/// no position, velocity or id: only aging and recycling apply
#[derive(FxType, Debug, Clone, Copy, PartialEq)]
struct Ember {
    color: [f32; 4],
    age: f32,
    lifetime: f32,
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

fn emitter(name: &str, capacity: u32) -> Result<Emitter, Box<dyn std::error::Error>> {
    init_logging();
    let desc = EmitterDesc::reference(name, capacity, Particle::layout())?;
    let mut emitter = Emitter::build(desc)?;
    emitter.reset()?;
    Ok(emitter)
}

fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// the derived layout is the one the reference routines are written against
#[test]
fn derived_particle_layout() {
    assert_eq!(Particle::layout(), kernels::particle());
}

/// a fountain running for a couple of frames
/// tests:
/// - the spawn routine drives emission every tick
/// - particles age by the timeline delta and move along their velocity
/// - expired particles return to the free list and are reused
#[test]
fn fountain() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let desc = EmitterDesc::reference("fountain", 16, Particle::layout())?.with_spawn(Arc::new(kernels::spawn(3)?));
    let mut emitter = Emitter::build(desc)?;
    emitter.reset()?;

    let mut timeline = Timeline::new();
    timeline.start(ms(0));
    let mut created = 0;
    for frame in 1..=4 {
        timeline.tick(ms(250 * frame));
        created += emitter.tick(&timeline)?.map_or(0, |report| report.created);
    }

    assert_eq!(emitter.state(), EmitterState::Running);
    assert_eq!(created, 12);
    assert_eq!(emitter.num_alive(), 12);

    let particles = emitter.alive_particles_as::<Particle>()?;
    assert_eq!(particles.len(), 12);
    for (slot, particle) in particles.iter() {
        assert_eq!(particle.id, *slot);
        assert!(particle.age < particle.lifetime);
        assert_eq!(particle.position[1], particle.age * particle.velocity[1]);
    }

    // the first batch reaches its lifetime of one second and makes room for the next
    timeline.tick(ms(1250));
    let report = emitter.tick(&timeline)?;
    assert_eq!(report.map(|r| r.created), Some(3));
    assert_eq!(emitter.num_alive(), 12);
    assert!(emitter.alive_particles_as::<Particle>()?.iter().all(|(_, p)| p.age < 1.0));
    emitter.dump();
    Ok(())
}

/// pausing the timeline freezes the particles, stopping it stops the emitter
#[test]
fn pause_and_stop() -> Result<(), Box<dyn std::error::Error>> {
    let mut emitter = emitter("paused", 8)?;
    emitter.emit(2)?;

    let mut timeline = Timeline::new();
    timeline.start(ms(0));
    timeline.tick(ms(100));
    emitter.tick(&timeline)?;
    let before = emitter.alive_particles_as::<Particle>()?;

    timeline.pause(ms(100));
    timeline.tick(ms(900));
    assert_eq!(emitter.tick(&timeline)?, None);
    assert_eq!(emitter.alive_particles_as::<Particle>()?, before);

    timeline.stop();
    emitter.tick(&timeline)?;
    assert_eq!(emitter.state(), EmitterState::Stopped);
    Ok(())
}

/// a single slot only holds the sentinel
#[test]
fn capacity_one() -> Result<(), Box<dyn std::error::Error>> {
    let mut emitter = emitter("tiny", 1)?;
    assert_eq!(emitter.num_alive(), 0);
    assert_eq!(emitter.dead_indices().map(|uav| uav.read_counter()), Some(0));

    let report = emitter.emit(5)?;
    assert_eq!((report.requested, report.created), (5, 0));
    assert!(report.is_exhausted());
    Ok(())
}

/// routines only touch the particle fields they know about
#[test]
fn custom_particle() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let desc = EmitterDesc::reference("embers", 8, Ember::layout())?;
    let mut emitter = Emitter::build(desc)?;
    emitter.reset()?;
    emitter.emit(3)?;

    if let Some(particles) = emitter.particles() {
        assert_eq!(particles.element_size(), 24);
    }

    emitter.update([("elapsedTime", Native::Float(0.5))])?;
    let embers = emitter.alive_particles_as::<Ember>()?;
    assert_eq!(embers.len(), 3);
    assert!(embers.iter().all(|(_, e)| e.age == 0.5 && e.lifetime == 1.0 && e.color == [0.0; 4]));
    Ok(())
}

/// rebuilding an emitter from new routines keeps the particles alive
#[test]
fn reload_keeps_state() -> Result<(), Box<dyn std::error::Error>> {
    let mut old = emitter("reload", 32)?;
    old.emit(5)?;
    old.update([("elapsedTime", Native::Float(0.25))])?;

    let layout = Particle::layout();
    let mut desc = EmitterDesc::reference("reload", 32, layout.clone())?;
    desc.init = Arc::new(kernels::init(&layout, 4.0, 2.0)?);
    let mut new = Emitter::build(desc)?;
    new.copy_state_from(&old)?;

    assert_eq!(new.num_alive(), 5);
    assert_eq!(new.alive_particles_as::<Particle>()?, old.alive_particles_as::<Particle>()?);

    new.emit(1)?;
    let fresh = new
        .alive_particles_as::<Particle>()?
        .into_iter()
        .filter(|(_, p)| p.age == 0.0)
        .collect::<Vec<_>>();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].1.lifetime, 4.0);
    assert_eq!(fresh[0].1.velocity, [0.0, 2.0, 0.0]);
    Ok(())
}

/// misuse is reported, not silently ignored
#[test]
fn errors() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let mut emitter = Emitter::new(EmitterDesc::reference("later", 4, Particle::layout())?);
    assert!(matches!(emitter.emit(1), Err(EmitterError::NotReady { .. })));
    assert!(matches!(emitter.tick(&Timeline::new()), Err(EmitterError::NotReady { .. })));

    emitter.setup()?;
    assert_eq!(emitter.state(), EmitterState::Ready);
    assert!(matches!(
        emitter.alive_particles_as::<Ember>(),
        Err(EmitterError::ParticleStride { .. })
    ));

    let idle = Arc::new(kernels::spawn(0)?);
    let other = EmitterDesc::new("other", 4, Particle::layout(), idle.clone(), idle.clone(), idle);
    assert_eq!(
        Emitter::build(other).err().map(|err| err.to_string()),
        Some("emitter `other`: no routine declares the `uavDeadIndices` uav".to_string())
    );
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// as long as the running total fits, every requested particle is created
    #[test]
    fn emits_are_counted(capacity in 1u32..150, batches in prop::collection::vec(0u32..40, 1..6)) {
        let mut emitter = emitter("counted", capacity).map_err(|err| TestCaseError::fail(err.to_string()))?;
        let mut total = 0;
        for count in batches {
            let report = emitter.emit(count).map_err(|err| TestCaseError::fail(err.to_string()))?;
            let expected = count.min(capacity - 1 - total);
            prop_assert_eq!(report.created, expected);
            total += expected;
            prop_assert_eq!(emitter.num_alive(), total);
        }

        emitter.reset().map_err(|err| TestCaseError::fail(err.to_string()))?;
        prop_assert_eq!(emitter.num_alive(), 0);
        prop_assert_eq!(emitter.dead_indices().map(|uav| uav.read_counter()), Some(capacity as i32 - 1));
    }
}
