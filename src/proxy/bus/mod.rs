pub mod codec;

use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::error::{Error, Result};
use crate::kernel::event::KernelEvent;
use crate::kernel::queue::QueueHandle;
use crate::proxy::bus::codec::{BusCodec, BusFrame};
use crate::proxy::ActorProxy;
use crate::rpc::wire::WireRecord;
use crate::util::id::ActorName;

/// Message bus between processes: every peer link is a framed TCP
/// connection; the handshake announces which topics each side hosts and
/// records are routed by topic. The kernel threads never touch sockets —
/// they hand records to `BusProxy`, and inbound records are enqueued onto
/// the owning actor's kernel queue.
pub struct BusNode {
    handle: Handle,
    /// topic → writer of the connection that hosts it.
    routes: RwLock<HashMap<ActorName, mpsc::UnboundedSender<BusFrame>>>,
    /// Topics hosted by this process, with their kernel queues.
    locals: RwLock<HashMap<ActorName, QueueHandle>>,
}

/// Owns the bus runtime; dropping it tears down every connection task.
pub struct Bus {
    node: Arc<BusNode>,
    runtime: Runtime,
}

impl Bus {
    /// Starts the bus. With a listen address the process accepts peer
    /// links; without one it only dials out.
    pub fn start(workers: usize, listen: Option<&str>) -> Result<Bus> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .thread_name("bus")
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("bus runtime failed to start: {}", e)))?;

        let node = Arc::new(BusNode {
            handle: runtime.handle().clone(),
            routes: RwLock::new(HashMap::new()),
            locals: RwLock::new(HashMap::new()),
        });

        if let Some(addr) = listen {
            let listener = runtime
                .block_on(TcpListener::bind(addr))
                .map_err(|e| Error::TransportFailure(format!("cannot listen on {}: {}", addr, e)))?;
            log::info!("bus listening on {}", addr);
            let accept_node = node.clone();
            runtime.spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, peer)) => {
                            log::info!("bus peer connected from {}", peer);
                            BusNode::attach(accept_node.clone(), stream);
                        }
                        Err(e) => {
                            log::error!("bus accept failed: {}", e);
                            break;
                        }
                    }
                }
            });
        }

        Ok(Bus { node, runtime })
    }

    pub fn node(&self) -> Arc<BusNode> {
        self.node.clone()
    }

    /// Dials a peer process and exchanges topic registrations.
    pub fn connect(&self, addr: &str) -> Result<()> {
        let stream = self
            .runtime
            .block_on(TcpStream::connect(addr))
            .map_err(|e| Error::TransportFailure(format!("cannot reach bus peer {}: {}", addr, e)))?;
        log::info!("bus connected to {}", addr);
        BusNode::attach(self.node.clone(), stream);
        Ok(())
    }
}

impl BusNode {
    /// Announces a locally hosted topic. Inbound records for it land on the
    /// given kernel queue; peers learn about it at the next handshake.
    pub fn register_local(&self, topic: ActorName, queue: QueueHandle) {
        self.locals.write().unwrap().insert(topic, queue);
    }

    pub fn unregister_local(&self, topic: &ActorName) {
        self.locals.write().unwrap().remove(topic);
    }

    /// Sends a record towards the peer hosting `topic`.
    pub fn deliver(&self, topic: &ActorName, record: WireRecord) -> Result<()> {
        let routes = self.routes.read().unwrap();
        let Some(writer) = routes.get(topic) else {
            return Err(Error::TransportFailure(format!("no bus route to {}", topic)));
        };
        writer
            .send(BusFrame::Record { topic: topic.clone(), record })
            .map_err(|_| Error::TransportFailure(format!("bus link to {} is down", topic)))
    }

    /// Wires up one TCP link: a writer task draining the outbound channel
    /// and a reader task registering routes and delivering records.
    fn attach(node: Arc<BusNode>, stream: TcpStream) {
        let framed = Framed::new(stream, BusCodec::new());
        let (mut sink, mut frames) = framed.split();
        let (writer, mut outbox) = mpsc::unbounded_channel::<BusFrame>();

        let topics: Vec<ActorName> = node.locals.read().unwrap().keys().cloned().collect();
        let _ = writer.send(BusFrame::Register { topics });

        node.handle.spawn(async move {
            while let Some(frame) = outbox.recv().await {
                if let Err(e) = sink.send(frame).await {
                    log::warn!("bus write failed: {}", e);
                    break;
                }
            }
        });

        let reader_node = node.clone();
        let route_writer = writer.clone();
        node.handle.spawn(async move {
            let mut registered: Vec<ActorName> = Vec::new();
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(BusFrame::Register { topics }) => {
                        let mut routes = reader_node.routes.write().unwrap();
                        for topic in topics {
                            log::info!("bus route added: {}", topic);
                            routes.insert(topic.clone(), route_writer.clone());
                            registered.push(topic);
                        }
                    }
                    Ok(BusFrame::Record { topic, record }) => {
                        let queue = reader_node.locals.read().unwrap().get(&topic).cloned();
                        match queue {
                            Some(queue) => {
                                if queue.post(KernelEvent::Incoming(record)).is_err() {
                                    log::warn!("dropping record for closed actor {}", topic);
                                }
                            }
                            None => log::warn!("record for unknown local topic {}", topic),
                        }
                    }
                    Err(e) => {
                        log::warn!("bus read failed: {}", e);
                        break;
                    }
                }
            }
            let mut routes = reader_node.routes.write().unwrap();
            for topic in registered {
                log::info!("bus route removed: {}", topic);
                routes.remove(&topic);
            }
        });
    }
}

/// Proxy for an actor living behind the bus: marshals the record onto the
/// bus instead of a kernel queue.
pub struct BusProxy {
    name: ActorName,
    node: Arc<BusNode>,
}

impl BusProxy {
    pub fn new(name: ActorName, node: Arc<BusNode>) -> Self {
        BusProxy { name, node }
    }
}

impl ActorProxy for BusProxy {
    fn name(&self) -> &ActorName {
        &self.name
    }

    fn deliver(&self, record: WireRecord) -> Result<()> {
        self.node.deliver(&self.name, record)
    }
}
