//! Mini-batch inference through neighbor-sampled blocks
//!
//! Builds a random graph, samples two hops around a batch of target nodes,
//! and checks that the sampled forward agrees in shape with the full-graph
//! forward restricted to the batch.
//!
//! Run with:
//! ```bash
//! cargo run --example sampled_forward
//! ```

use graph_condense_eval::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn main() -> Result<()> {
    let device = Device::Cpu;
    let mut rng = StdRng::seed_from_u64(7);
    let (n, d, nclass) = (200usize, 16usize, 4usize);

    // Random undirected graph, ~5 edges per node
    let mut rows = Vec::new();
    let mut cols = Vec::new();
    for i in 0..n as u32 {
        for _ in 0..5 {
            let j = rng.gen_range(0..n as u32);
            if j != i {
                rows.extend([i, j]);
                cols.extend([j, i]);
            }
        }
    }
    let adj = SparseAdjacency::from_coo(rows, cols, None, (n, n))?.sym_normalize()?;
    let features = Tensor::randn(0f32, 1.0, (n, d), &device)?;

    let mut hyper = ModelHyper::new(d, 32, nclass);
    hyper.nlayers = 2;
    let mut model = build_model(ModelFamily::Sgc, hyper, &device)?;
    model.initialize(0)?;

    let batch: Vec<u32> = (0..16).collect();
    let mut sampler = NeighborSampler::new(&adj, vec![10, 10], 0)?;
    let (n_id, blocks) = sampler.sample(&batch)?;
    let idx = Tensor::from_vec(n_id.clone(), n_id.len(), &device)?;
    let x = features.index_select(&idx, 0)?;

    let sampled = model.forward_sampler(&x, &blocks, false)?;
    let full = model.forward(&features, &Adjacency::Sparse(adj), false)?;

    println!("sampled {} input nodes over {} hops", n_id.len(), blocks.len());
    for (hop, block) in blocks.iter().enumerate() {
        println!("  block {}: {} -> {} nodes, {} edges", hop, block.size.0, block.size.1, block.adj.nnz());
    }
    println!("sampled output {:?}, full output {:?}", sampled.dims(), full.dims());

    let batch_idx = Tensor::from_vec(batch.clone(), batch.len(), &device)?;
    let full_batch = full.index_select(&batch_idx, 0)?;
    let labels = full_batch.argmax(1)?;
    println!(
        "agreement with full-graph predictions: {:.3}",
        accuracy(&sampled, &labels)?
    );
    Ok(())
}
