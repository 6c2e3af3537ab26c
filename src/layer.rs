use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use tracing::{debug, trace, warn};

/// The capability every concrete layer implements: it gets bytes from above (`send`) and from
///  below (`receive`), and it passes them on to its neighbors through the [LayerHandle] it gets
///  when the stack is started.
#[async_trait]
pub trait Layer: Send + Sync + 'static {
    /// Called exactly once per layer when the composed [LayerGraph] is started. The handle is
    ///  the layer's only way to reach its neighbors.
    async fn attach(&self, handle: LayerHandle);

    /// bytes coming from the layer above (or from application code)
    async fn send(&self, buf: &[u8]) -> anyhow::Result<()>;

    /// bytes coming from the layer below
    async fn receive(&self, buf: &[u8]) -> anyhow::Result<()>;

    /// Stops background activity. Called for all layers when the stack is shut down.
    async fn shutdown(&self) {}
}

/// A layer that neither originates nor consumes bytes. It occupies a slot in the layer graph,
///  e.g. for an application layer that is planned but not implemented yet.
pub struct PassiveLayer;

#[async_trait]
impl Layer for PassiveLayer {
    async fn attach(&self, _handle: LayerHandle) {}

    async fn send(&self, _buf: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn receive(&self, _buf: &[u8]) -> anyhow::Result<()> {
        Ok(())
    }
}


/// Identifies a layer inside the [LayerGraph] that created it
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LayerId(usize);

struct LayerNode {
    name: String,
    layer: Arc<dyn Layer>,
    under: Option<LayerId>,
    upper: Vec<LayerId>,
}

/// Layers are stored in an arena and refer to each other by [LayerId]. Each layer has at most
///  one layer 'under' it and an ordered list of layers 'upper' it. The graph is built bottom-up
///  with [LayerGraph::connect] and then [LayerGraph::start]ed, which freezes it.
#[derive(Default)]
pub struct LayerGraph {
    nodes: Vec<LayerNode>,
}

impl Debug for LayerGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for node in &self.nodes {
            list.entry(&format_args!("{}(under:{:?}, upper:{:?})", node.name, node.under, node.upper));
        }
        list.finish()
    }
}

impl LayerGraph {
    pub fn new() -> LayerGraph {
        Self::default()
    }

    pub fn add_layer(&mut self, name: impl Into<String>, layer: Arc<dyn Layer>) -> LayerId {
        let id = LayerId(self.nodes.len());
        self.nodes.push(LayerNode {
            name: name.into(),
            layer,
            under: None,
            upper: Vec::new(),
        });
        id
    }

    fn node(&self, id: LayerId) -> Option<&LayerNode> {
        self.nodes.get(id.0)
    }

    fn node_mut(&mut self, id: LayerId) -> Option<&mut LayerNode> {
        self.nodes.get_mut(id.0)
    }

    /// Replaces a layer's 'under' neighbor. `None` is ignored, i.e. an under neighbor can be
    ///  replaced but not removed.
    ///
    /// NB: This does not update the new neighbor's upper list, use [LayerGraph::connect] for that
    pub fn set_under(&mut self, id: LayerId, under: Option<LayerId>) {
        let Some(under) = under else {
            return;
        };
        if self.node(under).is_none() {
            warn!("setting unknown layer {:?} as under layer - ignoring", under);
            return;
        }
        match self.node_mut(id) {
            Some(node) => node.under = Some(under),
            None => warn!("setting under layer of unknown layer {:?} - ignoring", id),
        }
    }

    /// Appends a layer to another layer's list of 'upper' neighbors, returning the index at which
    ///  it was added. `None` is ignored.
    ///
    /// NB: This does not update the new neighbor's under reference, use [LayerGraph::connect] for that
    pub fn set_upper(&mut self, id: LayerId, upper: Option<LayerId>) -> Option<usize> {
        let upper = upper?;
        if self.node(upper).is_none() {
            warn!("adding unknown layer {:?} as upper layer - ignoring", upper);
            return None;
        }
        match self.node_mut(id) {
            Some(node) => {
                node.upper.push(upper);
                Some(node.upper.len() - 1)
            }
            None => {
                warn!("adding upper layer to unknown layer {:?} - ignoring", id);
                None
            }
        }
    }

    /// Places `child` on top of `parent`: `child` is appended to `parent`'s upper neighbors, and
    ///  `parent` becomes `child`'s under neighbor. Returns the index of `child` in `parent`'s
    ///  upper list.
    pub fn connect(&mut self, parent: LayerId, child: LayerId) -> anyhow::Result<usize> {
        if self.node(parent).is_none() {
            bail!("unknown parent layer {:?}", parent);
        }
        if self.node(child).is_none() {
            bail!("unknown child layer {:?}", child);
        }
        if parent == child {
            bail!("a layer can not be connected to itself: {:?}", parent);
        }

        let index = self.set_upper(parent, Some(child))
            .ok_or_else(|| anyhow!("could not add {:?} as upper layer of {:?}", child, parent))?;
        self.set_under(child, Some(parent));
        debug!("connected {} on top of {} at index {}", self.nodes[child.0].name, self.nodes[parent.0].name, index);
        Ok(index)
    }

    pub fn name(&self, id: LayerId) -> Option<&str> {
        self.node(id)
            .map(|n| n.name.as_str())
    }

    pub fn find(&self, name: &str) -> Option<LayerId> {
        self.nodes.iter()
            .position(|n| n.name == name)
            .map(LayerId)
    }

    pub fn layer(&self, id: LayerId) -> Option<Arc<dyn Layer>> {
        self.node(id)
            .map(|n| n.layer.clone())
    }

    pub fn under(&self, id: LayerId) -> Option<LayerId> {
        self.node(id)
            .and_then(|n| n.under)
    }

    /// the upper neighbor at a given index, or `None` if there is none at that index
    pub fn upper(&self, id: LayerId, index: usize) -> Option<LayerId> {
        self.node(id)
            .and_then(|n| n.upper.get(index).cloned())
    }

    pub fn upper_count(&self, id: LayerId) -> usize {
        self.node(id)
            .map(|n| n.upper.len())
            .unwrap_or(0)
    }

    /// Freezes the graph and attaches every layer to its [LayerHandle], in the order in which
    ///  they were added.
    pub async fn start(self) -> LayerStack {
        let graph = Arc::new(self);
        for (idx, node) in graph.nodes.iter().enumerate() {
            trace!("attaching layer {}", node.name);
            node.layer.attach(LayerHandle {
                graph: Arc::downgrade(&graph),
                id: LayerId(idx),
            }).await;
        }
        LayerStack { graph }
    }
}


/// A layer's view of the started layer graph. It holds a weak reference to the graph so that
///  layers (which are owned by the graph) do not keep it alive.
#[derive(Clone)]
pub struct LayerHandle {
    graph: Weak<LayerGraph>,
    id: LayerId,
}

impl Debug for LayerHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LayerHandle{{{:?}}}", self.id)
    }
}

impl LayerHandle {
    pub fn id(&self) -> LayerId {
        self.id
    }

    /// `true` if the stack this handle belongs to was dropped
    pub fn is_detached(&self) -> bool {
        self.graph.strong_count() == 0
    }

    fn graph(&self) -> anyhow::Result<Arc<LayerGraph>> {
        self.graph.upgrade()
            .ok_or_else(|| anyhow!("the layer stack of {:?} was dropped", self.id))
    }

    /// NB: The graph is released before the neighbor's `send` is awaited - sending can block for
    ///      a long time, and it must not keep a dropped stack alive
    pub async fn send_down(&self, buf: &[u8]) -> anyhow::Result<()> {
        let under = {
            let graph = self.graph()?;
            let under_id = graph.under(self.id)
                .ok_or_else(|| anyhow!("layer {:?} has no under layer", graph.name(self.id)))?;
            trace!("{:?} -> {:?}: {} bytes", graph.name(self.id), graph.name(under_id), buf.len());
            graph.layer(under_id)
                .ok_or_else(|| anyhow!("unknown layer {:?}", under_id))?
        };
        under.send(buf).await
    }

    pub async fn deliver_up(&self, index: usize, buf: &[u8]) -> anyhow::Result<()> {
        let upper = {
            let graph = self.graph()?;
            let upper_id = graph.upper(self.id, index)
                .ok_or_else(|| anyhow!("layer {:?} has no upper layer at index {}", graph.name(self.id), index))?;
            trace!("{:?} -> {:?}: {} bytes", graph.name(self.id), graph.name(upper_id), buf.len());
            graph.layer(upper_id)
                .ok_or_else(|| anyhow!("unknown layer {:?}", upper_id))?
        };
        upper.receive(buf).await
    }

    /// passes bytes to this handle's own layer as if they came from below - this is how a
    ///  medium delivers raw frames
    pub async fn receive(&self, buf: &[u8]) -> anyhow::Result<()> {
        let layer = self.graph()?
            .layer(self.id)
            .ok_or_else(|| anyhow!("unknown layer {:?}", self.id))?;
        layer.receive(buf).await
    }
}


/// A started, immutable layer graph. This is the entry point for application code to send
///  and for media to deliver.
#[derive(Clone)]
pub struct LayerStack {
    graph: Arc<LayerGraph>,
}

impl LayerStack {
    pub fn graph(&self) -> &LayerGraph {
        &self.graph
    }

    pub fn handle(&self, id: LayerId) -> LayerHandle {
        LayerHandle {
            graph: Arc::downgrade(&self.graph),
            id,
        }
    }

    fn layer(&self, id: LayerId) -> anyhow::Result<Arc<dyn Layer>> {
        self.graph.layer(id)
            .ok_or_else(|| anyhow!("unknown layer {:?}", id))
    }

    pub async fn send(&self, id: LayerId, buf: &[u8]) -> anyhow::Result<()> {
        self.layer(id)?
            .send(buf).await
    }

    pub async fn receive(&self, id: LayerId, buf: &[u8]) -> anyhow::Result<()> {
        self.layer(id)?
            .receive(buf).await
    }

    /// shuts down layers top-down, i.e. in reverse order of their addition
    pub async fn shutdown(&self) {
        for node in self.graph.nodes.iter().rev() {
            debug!("shutting down layer {}", node.name);
            node.layer.shutdown().await;
        }
    }
}
