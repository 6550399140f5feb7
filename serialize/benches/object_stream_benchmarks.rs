use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use redlilium_serialize::{
    load_blocking, FilterDescriptor, ObjectStreamWriter, StreamFormat, TypeRegistry, TypeUuid,
};
use redlilium_stream::MemoryStream;
use uuid::Uuid;

#[derive(Default)]
struct Particle {
    id: u32,
    name: String,
    position: Vec<f32>,
    alive: bool,
}

impl TypeUuid for Particle {
    fn type_uuid() -> Uuid {
        Uuid::from_u128(0x51f0_2c8e_77b3_4d19_a4e2_90c6_3b15_d001)
    }
}

#[derive(Default)]
struct Emitter {
    label: String,
    particles: Vec<Particle>,
}

impl TypeUuid for Emitter {
    fn type_uuid() -> Uuid {
        Uuid::from_u128(0x51f0_2c8e_77b3_4d19_a4e2_90c6_3b15_d002)
    }
}

fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::with_builtins();
    registry.register_vec::<f32>();
    registry
        .class::<Particle>("Particle")
        .field("id", |p| &p.id, |p| &mut p.id)
        .field("name", |p| &p.name, |p| &mut p.name)
        .field("position", |p| &p.position, |p| &mut p.position)
        .attribute("alive", |p| &p.alive, |p| &mut p.alive)
        .register();
    registry.register_vec::<Particle>();
    registry
        .class::<Emitter>("Emitter")
        .field("label", |e| &e.label, |e| &mut e.label)
        .field("particles", |e| &e.particles, |e| &mut e.particles)
        .register();
    registry
}

fn emitter(count: u32) -> Emitter {
    Emitter {
        label: "sparks".into(),
        particles: (0..count)
            .map(|id| Particle {
                id,
                name: format!("p{id}"),
                position: vec![id as f32, 0.5, -1.25],
                alive: id % 2 == 0,
            })
            .collect(),
    }
}

fn encode(registry: &TypeRegistry, format: StreamFormat, emitter: &Emitter) -> Vec<u8> {
    let mut stream = MemoryStream::new();
    let mut writer = ObjectStreamWriter::create(&mut stream, registry, format);
    writer.write_object(emitter);
    writer.finalize();
    stream.into_inner()
}

const FORMATS: [StreamFormat; 3] = [StreamFormat::Binary, StreamFormat::Xml, StreamFormat::Json];

// ---------------------------------------------------------------------------
// Save
// ---------------------------------------------------------------------------

fn bench_save(c: &mut Criterion) {
    let registry = registry();
    let emitter = emitter(1000);
    let mut group = c.benchmark_group("save_1000_particles");
    for format in FORMATS {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{format:?}")), &format, |b, &format| {
            b.iter(|| black_box(encode(&registry, format, &emitter)));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

fn bench_load(c: &mut Criterion) {
    let registry = registry();
    let emitter = emitter(1000);
    let filter = FilterDescriptor::default();
    let mut group = c.benchmark_group("load_1000_particles");
    for format in FORMATS {
        let bytes = encode(&registry, format, &emitter);
        group.bench_with_input(BenchmarkId::from_parameter(format!("{format:?}")), &bytes, |b, bytes| {
            b.iter(|| {
                let mut stream = MemoryStream::read_only(bytes.clone());
                let mut loaded = 0;
                load_blocking(&mut stream, &registry, |_, _, _| loaded += 1, &filter, None);
                black_box(loaded)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_save, bench_load);
criterion_main!(benches);
