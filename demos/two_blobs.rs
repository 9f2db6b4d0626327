use kernel_fda::{KernelFda, KfdaConfig};
use ndarray::Array2;

fn main() {
    // Two small clusters, one around (0, 0) and one around (4, 4)
    let data = Array2::from_shape_vec(
        (6, 2),
        vec![0.0, 0.2, 0.3, -0.1, -0.2, 0.1, 4.0, 4.2, 4.3, 3.9, 3.8, 4.1],
    )
    .unwrap();
    let labels = ["left", "left", "left", "right", "right", "right"];

    let mut kfda: KernelFda<&str> = KernelFda::new(KfdaConfig::default()).expect("invalid configuration");
    let projected = kfda.fit_transform(data.view(), &labels).expect("KFDA fit failed");

    println!("Classes: {:?}", kfda.classes().unwrap());
    println!("Weights shape: {:?}", kfda.weights().unwrap().dim());
    for (label, row) in labels.iter().zip(projected.rows()) {
        println!("{:>6}: {:+.4}", label, row[0]);
    }
    println!("Diagnostics: {:?}", kfda.diagnostics().unwrap());
}
