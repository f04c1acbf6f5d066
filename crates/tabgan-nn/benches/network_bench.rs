use candle_core::{Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tabgan_nn::init::normal_vec;
use tabgan_nn::{Discriminator, DiscriminatorConfig, Generator, GeneratorConfig};

fn batch(rng: &mut StdRng, rows: usize, cols: usize) -> Tensor {
    Tensor::from_vec(normal_vec(rng, rows * cols), (rows, cols), &Device::Cpu).unwrap()
}

fn bench_generator_forward(c: &mut Criterion) {
    c.bench_function("Generator::forward (500×128 → 32)", |b| {
        let mut rng = StdRng::seed_from_u64(0);
        let config = GeneratorConfig {
            input_dim: 128,
            residual_dims: vec![256, 256],
            output_dim: 32,
        };
        let gen = Generator::new(&config, &mut rng, &Device::Cpu).unwrap();
        let z = batch(&mut rng, 500, 128);
        b.iter(|| black_box(gen.forward(&z).unwrap()))
    });
}

fn bench_discriminator_forward(c: &mut Criterion) {
    c.bench_function("Discriminator::forward (500×32, pac 10)", |b| {
        let mut rng = StdRng::seed_from_u64(1);
        let config = DiscriminatorConfig {
            input_dim: 32,
            hidden_dims: vec![256, 256],
            pac: 10,
        };
        let disc = Discriminator::new(&config, &mut rng, &Device::Cpu).unwrap();
        let x = batch(&mut rng, 500, 32);
        b.iter(|| black_box(disc.forward(&x, &mut rng).unwrap()))
    });
}

fn bench_gradient_penalty(c: &mut Criterion) {
    c.bench_function("Discriminator::gradient_penalty (500×32, pac 10)", |b| {
        let mut rng = StdRng::seed_from_u64(2);
        let config = DiscriminatorConfig {
            input_dim: 32,
            hidden_dims: vec![256, 256],
            pac: 10,
        };
        let disc = Discriminator::new(&config, &mut rng, &Device::Cpu).unwrap();
        let real = batch(&mut rng, 500, 32);
        let fake = batch(&mut rng, 500, 32);
        b.iter(|| black_box(disc.gradient_penalty(&real, &fake, 10.0, &mut rng).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_generator_forward,
    bench_discriminator_forward,
    bench_gradient_penalty
);
criterion_main!(benches);
