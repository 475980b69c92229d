//! Stream a small pixel grid through the transform service and report what
//! came back. Stands in for a real image pipeline; plug an image
//! decoder in front and an encoder behind to process real files.
//!
//! Run with: `cargo run -p tint --example transform_pipe`

use tint::{connect, dispatcher, Color, Pixel, Point, Server, TintConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = TintConfig::default();
    let dispatcher = dispatcher(&config)?;
    let listener = tint::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    tokio::spawn({
        let server_config = config.server_config()?;
        async move {
            let _ = Server::new(dispatcher, server_config).serve(listener).await;
        }
    });

    let client = connect(&addr, config.client_config()?).await?;
    let mut stream = client.open_stream::<Pixel>(&tint::TRANSFORM)?;

    let (width, height) = (8, 8);
    for y in 0..height {
        for x in 0..width {
            stream.send(&Pixel {
                color: Color {
                    r: 0.9,
                    g: (x as f32) / width as f32,
                    b: (y as f32) / height as f32,
                    a: 1.0,
                },
                point: Point { x, y },
            })?;
        }
    }
    stream.close_send()?;

    let mut grid = vec![None; (width * height) as usize];
    let mut count = 0usize;
    while let Some(pixel) = stream.recv().await? {
        let index = (pixel.point.y * width + pixel.point.x) as usize;
        grid[index] = Some(pixel);
        count += 1;
    }
    stream.finish().await?;

    let red_left = grid
        .iter()
        .flatten()
        .filter(|p| p.color.r != 0.0)
        .count();
    println!("transformed {count} pixels, {red_left} with red remaining");
    Ok(())
}
